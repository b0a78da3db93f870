//! Consolidation of parsed operations into additive-update batches
//!
//! One `AdditiveUpdate` per subject entity, augmented with connectivity and
//! provenance edges: `referenced_by` back-edges keep orphan targets
//! traversable, `extracted_from` ties every touched entity to its source
//! chunk, and synthetic updates give the chunk and the collection their own
//! audit edges.

use crate::normalize::normalize_label;
use crate::ops::ParsedOperations;
use crate::quotes::extract_quote;
use crate::types::{
    AdditiveUpdate, CheckCreateResult, CollectionId, Direction, RelationshipAdd, SourceRef,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Build the additive updates for one job.
///
/// `results` key the normalized labels to resolved entity ids; operations
/// whose labels did not survive check-create are skipped with a warning.
/// Splitting into ≤1000-entry requests is the caller's responsibility.
pub fn build_updates(
    parsed: &ParsedOperations,
    results: &[CheckCreateResult],
    source: &SourceRef,
    chunk_text: &str,
    collection: &CollectionId,
) -> Vec<AdditiveUpdate> {
    let ids: HashMap<&str, &CheckCreateResult> = results
        .iter()
        .map(|r| (r.label.as_str(), r))
        .collect();
    let now = Utc::now().to_rfc3339();
    let source_value = json!(source);

    // BTreeMap keeps batch contents deterministic across runs.
    let mut by_entity: BTreeMap<String, AdditiveUpdate> = BTreeMap::new();

    // Create payloads: the entity record itself was created with only its
    // label; description and the rest of the create arrive additively.
    for create in &parsed.creates {
        let label = normalize_label(&create.label);
        let Some(result) = ids.get(label.as_str()) else {
            continue;
        };
        let update = entry(&mut by_entity, &result.entity_id);
        if !create.description.is_empty() {
            update
                .properties
                .insert("description".into(), Value::String(create.description.clone()));
        }
        for (key, value) in &create.properties {
            update
                .properties
                .insert(key.clone(), Value::String(value.clone()));
        }
    }

    // Property assignments.
    for prop in &parsed.properties {
        let label = normalize_label(&prop.entity);
        let Some(result) = ids.get(label.as_str()) else {
            warn!(entity = %prop.entity, key = %prop.key, "skipping property for unknown entity");
            continue;
        };
        entry(&mut by_entity, &result.entity_id)
            .properties
            .insert(prop.key.clone(), Value::String(prop.value.clone()));
    }

    // Relationships, with quote provenance where markers resolve.
    let mut has_outgoing: HashSet<String> = HashSet::new();
    // target id -> (subject id of first referencing edge, its predicate)
    let mut referenced_targets: HashMap<String, (String, String)> = HashMap::new();

    for rel in &parsed.relationships {
        let subject_label = normalize_label(&rel.subject);
        let target_label = normalize_label(&rel.target);
        let (Some(subject), Some(target)) = (
            ids.get(subject_label.as_str()),
            ids.get(target_label.as_str()),
        ) else {
            warn!(
                subject = %rel.subject,
                target = %rel.target,
                predicate = %rel.predicate,
                "skipping relationship with unresolved endpoint"
            );
            continue;
        };

        let mut properties = Map::new();
        properties.insert("description".into(), Value::String(rel.description.clone()));
        properties.insert("source".into(), source_value.clone());
        if let (Some(start), Some(end)) = (&rel.quote_start, &rel.quote_end) {
            if let Some(quote) = extract_quote(chunk_text, start, end) {
                properties.insert("source_text".into(), Value::String(quote));
            }
        }
        properties.insert("confidence".into(), json!(1.0));

        entry(&mut by_entity, &subject.entity_id)
            .relationships_add
            .push(RelationshipAdd {
                predicate: rel.predicate.clone(),
                peer: target.entity_id.clone(),
                peer_label: Some(rel.target.clone()),
                direction: Direction::Outgoing,
                properties,
            });

        has_outgoing.insert(subject.entity_id.clone());
        referenced_targets
            .entry(target.entity_id.clone())
            .or_insert_with(|| (subject.entity_id.clone(), rel.predicate.clone()));
    }

    // Orphan attachment: a target that is never itself a subject gets a
    // back-edge to its first referrer so every extracted entity has at
    // least one outgoing edge.
    for (target_id, (subject_id, predicate)) in &referenced_targets {
        if has_outgoing.contains(target_id) {
            continue;
        }
        let mut properties = Map::new();
        properties.insert("context".into(), Value::String(predicate.clone()));
        properties.insert("source".into(), source_value.clone());
        entry(&mut by_entity, target_id)
            .relationships_add
            .push(RelationshipAdd {
                predicate: "referenced_by".into(),
                peer: subject_id.clone(),
                peer_label: None,
                direction: Direction::Outgoing,
                properties,
            });
    }

    // Provenance: every entity this job resolved points back at its chunk.
    for result in results {
        let mut properties = Map::new();
        properties.insert("extracted_at".into(), Value::String(now.clone()));
        properties.insert("source".into(), source_value.clone());
        entry(&mut by_entity, &result.entity_id)
            .relationships_add
            .push(RelationshipAdd {
                predicate: "extracted_from".into(),
                peer: source.id.clone(),
                peer_label: Some(source.label.clone()),
                direction: Direction::Outgoing,
                properties,
            });
    }

    let mut updates: Vec<AdditiveUpdate> = by_entity.into_values().collect();

    // Source backlinks: the chunk records what was extracted from it.
    let mut chunk_update = AdditiveUpdate::new(source.id.clone());
    for result in results {
        let mut properties = Map::new();
        properties.insert("extracted_at".into(), Value::String(now.clone()));
        properties.insert(
            "entity_type".into(),
            Value::String(result.entity_type.clone()),
        );
        chunk_update.relationships_add.push(RelationshipAdd {
            predicate: "extracted_entity".into(),
            peer: result.entity_id.clone(),
            peer_label: Some(result.label.clone()),
            direction: Direction::Outgoing,
            properties,
        });
    }
    updates.push(chunk_update);

    // Collection audit: the collection records that this chunk was processed.
    let mut collection_update = AdditiveUpdate::new(collection.as_str());
    let mut properties = Map::new();
    properties.insert(
        "relationship_type".into(),
        Value::String("processed_chunk".into()),
    );
    properties.insert("processed_at".into(), Value::String(now));
    collection_update.relationships_add.push(RelationshipAdd {
        predicate: "contains".into(),
        peer: source.id.clone(),
        peer_label: Some(source.label.clone()),
        direction: Direction::Outgoing,
        properties,
    });
    updates.push(collection_update);

    updates
}

fn entry<'a>(
    by_entity: &'a mut BTreeMap<String, AdditiveUpdate>,
    entity_id: &str,
) -> &'a mut AdditiveUpdate {
    by_entity
        .entry(entity_id.to_string())
        .or_insert_with(|| AdditiveUpdate::new(entity_id))
}
