use extract::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How conflicting non-null values for one property are settled when
/// mentions are merged. Folding always runs in chunk order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    FirstNonNullWins,
    LastNonNullWins,
}

impl MergePolicy {
    /// Merge `incoming` into `merged`. Never drops a key present in either.
    pub fn merge(self, merged: &mut Properties, incoming: &Properties) {
        for (name, value) in incoming {
            match self {
                MergePolicy::FirstNonNullWins => {
                    merged.entry(name.clone()).or_insert_with(|| value.clone());
                }
                MergePolicy::LastNonNullWins => {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
    }
}

/// One entity after every mention in the document has been folded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntity {
    pub dedup_key: String,
    pub label: String,
    pub merged_properties: Properties,
    pub source_chunk_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpsert {
    pub label: String,
    pub dedup_key: String,
    /// Key the store matches on: the dedup key, scoped to the document
    /// unless the node type has global identity.
    pub store_key: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipUpsert {
    pub rel_type: String,
    pub source_label: String,
    pub source_key: String,
    pub target_label: String,
    pub target_key: String,
    pub properties: Properties,
}

/// Everything one document writes, nodes strictly before relationships.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMutation {
    pub document_id: String,
    pub document_source: String,
    pub nodes: Vec<NodeUpsert>,
    pub relationships: Vec<RelationshipUpsert>,
}

impl GraphMutation {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }
}

pub fn scoped_key(document_id: &str, dedup_key: &str) -> String {
    format!("{}::{}", document_id, dedup_key)
}
