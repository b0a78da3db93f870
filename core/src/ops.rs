//! Parsing and validation of the model's operation list
//!
//! The model returns JSON: either a bare array of operations or an object
//! wrapping one under `"operations"`. Malformed JSON is fatal; individually
//! malformed operations are dropped with a warning so one bad row never
//! sinks the batch.

use crate::errors::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// How many characters of a bad response to echo back in the error.
const SNIPPET_LEN: usize = 500;

/// Entity creation request emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOp {
    pub label: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Relationship between two labelled entities, with optional quote markers
/// locating the supporting passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRelationshipOp {
    pub subject: String,
    pub predicate: String,
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_end: Option<String>,
}

/// Single property assignment; older prompt revisions emit these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPropertyOp {
    pub entity: String,
    pub key: String,
    pub value: String,
}

/// One operation, tagged the way the model emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create(CreateOp),
    AddRelationship(AddRelationshipOp),
    AddProperty(AddPropertyOp),
}

/// The model's output, validated and split by variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOperations {
    pub creates: Vec<CreateOp>,
    pub properties: Vec<AddPropertyOp>,
    pub relationships: Vec<AddRelationshipOp>,
}

impl ParsedOperations {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.properties.is_empty() && self.relationships.is_empty()
    }

    /// Total operations across the three lists.
    pub fn len(&self) -> usize {
        self.creates.len() + self.properties.len() + self.relationships.len()
    }

    /// Re-assemble a tagged operation list (creates, then properties, then
    /// relationships; order within each list preserved).
    pub fn to_operations(&self) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.len());
        ops.extend(self.creates.iter().cloned().map(Operation::Create));
        ops.extend(self.properties.iter().cloned().map(Operation::AddProperty));
        ops.extend(
            self.relationships
                .iter()
                .cloned()
                .map(Operation::AddRelationship),
        );
        ops
    }
}

/// Parse the raw content string returned by the model.
///
/// Accepts a bare array or `{"operations": [...]}`. Unrecognized or invalid
/// operations are dropped with a warning; JSON failure is fatal and carries
/// the head of the offending response.
pub fn parse_operations(content: &str) -> Result<ParsedOperations, ParseError> {
    let cleaned = strip_code_fences(content);

    let value: Value = serde_json::from_str(cleaned).map_err(|e| ParseError::Json {
        message: e.to_string(),
        snippet: snippet(cleaned),
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("operations") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ParseError::Shape(format!(
                    "\"operations\" is {}, expected an array",
                    kind_of(&other)
                )))
            }
            None => {
                return Err(ParseError::Shape(
                    "object has no \"operations\" array".to_string(),
                ))
            }
        },
        other => {
            return Err(ParseError::Shape(format!(
                "expected an array or an object, got {}",
                kind_of(&other)
            )))
        }
    };

    let mut parsed = ParsedOperations::default();
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(op) = item else {
            warn!(index, "dropping non-object operation");
            continue;
        };
        let Some(tag) = op
            .get("op")
            .or_else(|| op.get("operation"))
            .and_then(Value::as_str)
            .map(str::to_lowercase)
        else {
            warn!(index, "dropping operation without an op tag");
            continue;
        };

        match tag.as_str() {
            "create" => {
                if let Some(create) = validate_create(index, &op) {
                    parsed.creates.push(create);
                }
            }
            "add_relationship" => {
                if let Some(rel) = validate_relationship(index, &op) {
                    parsed.relationships.push(rel);
                }
            }
            "add_property" => {
                if let Some(prop) = validate_property(index, &op) {
                    parsed.properties.push(prop);
                }
            }
            other => {
                warn!(index, op = other, "dropping unrecognized operation");
            }
        }
    }

    Ok(parsed)
}

/// Union of every label mentioned anywhere in the operation list: create
/// labels, relationship subjects and targets, property entities.
pub fn referenced_labels(parsed: &ParsedOperations) -> HashSet<String> {
    let mut labels = HashSet::new();
    for create in &parsed.creates {
        labels.insert(create.label.clone());
    }
    for rel in &parsed.relationships {
        labels.insert(rel.subject.clone());
        labels.insert(rel.target.clone());
    }
    for prop in &parsed.properties {
        labels.insert(prop.entity.clone());
    }
    labels
}

fn validate_create(index: usize, op: &serde_json::Map<String, Value>) -> Option<CreateOp> {
    let label = required_string(index, op, "label", "create")?;
    let entity_type = required_string(index, op, "entity_type", "create")?;

    // Legacy shape: missing description is tolerated with a warning so the
    // worker survives model prompt regressions.
    let description = match op.get("description").and_then(Value::as_str) {
        Some(d) => d.to_string(),
        None => {
            warn!(index, label = %label, "create without description (legacy shape)");
            String::new()
        }
    };

    let mut properties = BTreeMap::new();
    match op.get("properties") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                match value {
                    Value::String(s) => {
                        properties.insert(key.clone(), s.clone());
                    }
                    Value::Number(n) => {
                        properties.insert(key.clone(), n.to_string());
                    }
                    Value::Bool(b) => {
                        properties.insert(key.clone(), b.to_string());
                    }
                    _ => {
                        warn!(index, key = %key, "skipping non-scalar create property");
                    }
                }
            }
        }
        Some(_) => {
            warn!(index, label = %label, "dropping create with non-object properties");
            return None;
        }
    }

    if properties.len() < 2 {
        warn!(index, label = %label, "create has fewer than two properties");
    }

    Some(CreateOp {
        label,
        entity_type,
        description,
        properties,
    })
}

fn validate_relationship(
    index: usize,
    op: &serde_json::Map<String, Value>,
) -> Option<AddRelationshipOp> {
    let subject = required_string(index, op, "subject", "add_relationship")?;
    let predicate = required_string(index, op, "predicate", "add_relationship")?;
    let target = required_string(index, op, "target", "add_relationship")?;

    let description = match op.get("description").and_then(Value::as_str) {
        Some(d) => d.to_string(),
        None => {
            warn!(index, predicate = %predicate, "relationship without description (legacy shape)");
            String::new()
        }
    };

    let quote_start = optional_string(index, op, "quote_start")?;
    let quote_end = optional_string(index, op, "quote_end")?;

    Some(AddRelationshipOp {
        subject,
        predicate,
        target,
        description,
        quote_start,
        quote_end,
    })
}

fn validate_property(index: usize, op: &serde_json::Map<String, Value>) -> Option<AddPropertyOp> {
    let entity = required_string(index, op, "entity", "add_property")?;
    let key = required_string(index, op, "key", "add_property")?;
    let value = required_string(index, op, "value", "add_property")?;
    Some(AddPropertyOp { entity, key, value })
}

fn required_string(
    index: usize,
    op: &serde_json::Map<String, Value>,
    field: &str,
    op_name: &str,
) -> Option<String> {
    match op.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => {
            warn!(index, field, op = op_name, "dropping operation with missing or non-string field");
            None
        }
    }
}

/// Present-but-wrong-type invalidates the op; absent is fine.
fn optional_string(
    index: usize,
    op: &serde_json::Map<String, Value>,
    field: &str,
) -> Option<Option<String>> {
    match op.get(field) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(_) => {
            warn!(index, field, "dropping operation with non-string optional field");
            None
        }
    }
}

/// Models occasionally wrap JSON in markdown fences despite the JSON mime
/// type; strip them before parsing.
fn strip_code_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn snippet(content: &str) -> String {
    content.chars().take(SNIPPET_LEN).collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
