//! Prompt composition for the extraction call

use crate::types::EntityContext;
use serde_json::json;
use std::fmt::Write;

/// System instruction describing the operation schema the model must emit.
pub const SYSTEM_PROMPT: &str = r#"You are a knowledge-graph extraction engine. You read one text chunk together with metadata about the entity that carries it, and you emit a JSON array of operations describing the entities, properties and relationships stated in the text.

Emit ONLY a JSON array (no prose, no markdown) of objects in these forms:

{
  "op": "create",
  "label": "entity name as written in the text",
  "entity_type": "person | place | organization | object | concept | event | ...",
  "description": "one sentence describing the entity",
  "properties": {"key": "value", "...": "..."}
}

{
  "op": "add_relationship",
  "subject": "label of the subject entity",
  "predicate": "short verb phrase, e.g. commands, born_in",
  "target": "label of the target entity",
  "description": "one sentence describing the relationship",
  "quote_start": "first few words of the supporting passage",
  "quote_end": "last few words of the supporting passage"
}

Rules:
- Emit a create for every entity you mention as a subject or target.
- Give each create at least two properties when the text supports them.
- quote_start/quote_end must be short phrases copied verbatim from the text, bracketing a passage of at most a few sentences.
- Only extract what the text states. Do not infer or invent.
- If the text yields nothing, return []."#;

/// Compose the user prompt: chunk metadata as context, then the text.
pub fn user_prompt(ctx: &EntityContext, text: &str) -> String {
    let mut prompt = String::with_capacity(text.len() + 512);

    writeln!(prompt, "Source chunk:").ok();
    writeln!(prompt, "  id: {}", ctx.id).ok();
    writeln!(prompt, "  type: {}", ctx.entity_type).ok();
    writeln!(prompt, "  label: {}", ctx.label).ok();
    if let Some(description) = &ctx.description {
        writeln!(prompt, "  description: {description}").ok();
    }
    if !ctx.properties.is_empty() {
        writeln!(
            prompt,
            "  properties: {}",
            serde_json::Value::Object(ctx.properties.clone())
        )
        .ok();
    }

    if !ctx.relationships.is_empty() {
        writeln!(prompt, "Existing relationships of this chunk:").ok();
        for rel in &ctx.relationships {
            let peer = rel
                .peer_label
                .clone()
                .or_else(|| {
                    rel.peer_preview
                        .as_ref()
                        .and_then(|p| p.get("label"))
                        .and_then(|l| l.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| rel.peer.clone());
            writeln!(
                prompt,
                "  {}",
                json!({"predicate": rel.predicate, "peer": peer})
            )
            .ok();
        }
    }

    writeln!(prompt, "\nText:\n{text}").ok();
    prompt
}
