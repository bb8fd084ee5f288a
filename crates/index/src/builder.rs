//! Folds a document's canonical extractions into one graph mutation.

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

use extract::{
    CanonicalExtraction, CanonicalRelationship, Properties, Rejection, RejectionKind, Schema,
    Subject,
};

use crate::mutation::{
    GlobalEntity, GraphMutation, MergePolicy, NodeUpsert, RelationshipUpsert, scoped_key,
};

/// The extraction contract itself is broken. Fails the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("schema violation in chunk {chunk_id}: {reason}")]
    SchemaViolation { reason: String, chunk_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub mutation: GraphMutation,
    pub entities: Vec<GlobalEntity>,
    pub dangling_references: Vec<Rejection>,
}

struct FoldedRelationship {
    rel_type: String,
    source_key: String,
    target_key: String,
    properties: Properties,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder {
    policy: MergePolicy,
}

impl GraphBuilder {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Merge every chunk's output. Completion order is irrelevant: chunks
    /// are folded by `sequence_index`.
    pub fn build(
        &self,
        schema: &Schema,
        document_id: &str,
        extractions: &[CanonicalExtraction],
    ) -> Result<BuildOutput, BuildError> {
        let mut ordered: Vec<&CanonicalExtraction> = extractions.iter().collect();
        ordered.sort_by_key(|e| e.sequence_index);

        let mut entities: Vec<GlobalEntity> = Vec::new();
        let mut entity_index: HashMap<String, usize> = HashMap::new();
        for extraction in &ordered {
            for entity in &extraction.entities {
                if schema.node_type(&entity.label).is_none() {
                    return Err(BuildError::SchemaViolation {
                        reason: format!("entity label {} is not declared", entity.label),
                        chunk_id: entity.chunk_id.clone(),
                    });
                }
                match entity_index.get(&entity.dedup_key) {
                    Some(&index) => {
                        let global = &mut entities[index];
                        self.policy
                            .merge(&mut global.merged_properties, &entity.properties);
                        global.source_chunk_ids.insert(entity.chunk_id.clone());
                    }
                    None => {
                        entity_index.insert(entity.dedup_key.clone(), entities.len());
                        entities.push(GlobalEntity {
                            dedup_key: entity.dedup_key.clone(),
                            label: entity.label.clone(),
                            merged_properties: entity.properties.clone(),
                            source_chunk_ids: BTreeSet::from([entity.chunk_id.clone()]),
                        });
                    }
                }
            }
        }

        let mut relationships: Vec<FoldedRelationship> = Vec::new();
        let mut relationship_index: HashMap<(String, String, String), usize> = HashMap::new();
        let mut dangling_references = Vec::new();
        for extraction in &ordered {
            for rel in &extraction.relationships {
                check_relationship(schema, rel)?;

                let missing: Vec<&str> = [&rel.source_key, &rel.target_key]
                    .into_iter()
                    .filter(|key| !entity_index.contains_key(key.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    dangling_references.push(Rejection::new(
                        Subject::Relationship,
                        RejectionKind::DanglingReference,
                        format!(
                            "{} endpoint {} never resolves to an entity in the document",
                            rel.rel_type,
                            missing.join(" and ")
                        ),
                        rel.raw.clone(),
                        rel.chunk_id.clone(),
                    ));
                    continue;
                }

                for (key, declared) in [
                    (&rel.source_key, &rel.source_label),
                    (&rel.target_key, &rel.target_label),
                ] {
                    let entity = &entities[entity_index[key.as_str()]];
                    if &entity.label != declared {
                        return Err(BuildError::SchemaViolation {
                            reason: format!(
                                "{} expects {} but {} is a {}",
                                rel.rel_type, declared, key, entity.label
                            ),
                            chunk_id: rel.chunk_id.clone(),
                        });
                    }
                }

                let fold_key = (
                    rel.source_key.clone(),
                    rel.rel_type.clone(),
                    rel.target_key.clone(),
                );
                match relationship_index.get(&fold_key) {
                    Some(&index) => self
                        .policy
                        .merge(&mut relationships[index].properties, &rel.properties),
                    None => {
                        relationship_index.insert(fold_key, relationships.len());
                        relationships.push(FoldedRelationship {
                            rel_type: rel.rel_type.clone(),
                            source_key: rel.source_key.clone(),
                            target_key: rel.target_key.clone(),
                            properties: rel.properties.clone(),
                        });
                    }
                }
            }
        }

        let store_key = |entity: &GlobalEntity| {
            let global = schema
                .node_type(&entity.label)
                .is_some_and(|node_type| node_type.global_identity);
            if global {
                entity.dedup_key.clone()
            } else {
                scoped_key(document_id, &entity.dedup_key)
            }
        };

        let nodes = entities
            .iter()
            .map(|entity| NodeUpsert {
                label: entity.label.clone(),
                dedup_key: entity.dedup_key.clone(),
                store_key: store_key(entity),
                properties: entity.merged_properties.clone(),
            })
            .collect();

        let relationships = relationships
            .into_iter()
            .map(|rel| {
                let source = &entities[entity_index[rel.source_key.as_str()]];
                let target = &entities[entity_index[rel.target_key.as_str()]];
                RelationshipUpsert {
                    rel_type: rel.rel_type,
                    source_label: source.label.clone(),
                    source_key: store_key(source),
                    target_label: target.label.clone(),
                    target_key: store_key(target),
                    properties: rel.properties,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            document_id,
            entities = entities.len(),
            relationships = relationships.len(),
            dangling = dangling_references.len(),
            "Built graph mutation"
        );

        Ok(BuildOutput {
            mutation: GraphMutation {
                document_id: document_id.to_string(),
                document_source: String::new(),
                nodes,
                relationships,
            },
            entities,
            dangling_references,
        })
    }
}

fn check_relationship(schema: &Schema, rel: &CanonicalRelationship) -> Result<(), BuildError> {
    let violation = |reason: String| BuildError::SchemaViolation {
        reason,
        chunk_id: rel.chunk_id.clone(),
    };

    let declared = schema
        .relationship_type(&rel.rel_type)
        .ok_or_else(|| violation(format!("relationship type {} is not declared", rel.rel_type)))?;

    if declared.source_label != rel.source_label || declared.target_label != rel.target_label {
        return Err(violation(format!(
            "{} is declared {} -> {} but was built as {} -> {}",
            rel.rel_type,
            declared.source_label,
            declared.target_label,
            rel.source_label,
            rel.target_label
        )));
    }
    Ok(())
}
