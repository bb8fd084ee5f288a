use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::value::PropertyValue;

pub type Properties = BTreeMap<String, PropertyValue>;

/// What a rejection was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Entity,
    Relationship,
    Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    UnresolvedLabel,
    MissingIdentity,
    MissingRequiredProperty,
    PropertyCoercion,
    UndeclaredProperty,
    UnknownRelationshipType,
    UnresolvedEndpoint,
    SchemaViolation,
    DanglingReference,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectionKind::UnresolvedLabel => "unresolved label",
            RejectionKind::MissingIdentity => "missing identity",
            RejectionKind::MissingRequiredProperty => "missing required property",
            RejectionKind::PropertyCoercion => "property coercion",
            RejectionKind::UndeclaredProperty => "undeclared property",
            RejectionKind::UnknownRelationshipType => "unknown relationship type",
            RejectionKind::UnresolvedEndpoint => "unresolved endpoint",
            RejectionKind::SchemaViolation => "schema violation",
            RejectionKind::DanglingReference => "dangling reference",
        };
        f.write_str(name)
    }
}

/// A data-quality problem. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub subject: Subject,
    pub kind: RejectionKind,
    pub reason: String,
    /// The offending fragment as the model produced it.
    pub raw: Value,
    pub chunk_id: String,
}

impl Rejection {
    pub fn new(
        subject: Subject,
        kind: RejectionKind,
        reason: impl Into<String>,
        raw: Value,
        chunk_id: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            kind,
            reason: reason.into(),
            raw,
            chunk_id: chunk_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Chunk-local id; meaningless outside its chunk.
    pub local_id: String,
    pub dedup_key: String,
    pub label: String,
    pub properties: Properties,
    pub chunk_id: String,
}

/// A relationship whose endpoints are dedup keys, not raw ids.
///
/// An endpoint that did not resolve inside its chunk carries the key it
/// would have under the declared endpoint label; the graph builder decides
/// whether anything in the document has that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub rel_type: String,
    pub source_key: String,
    pub target_key: String,
    pub source_label: String,
    pub target_label: String,
    pub properties: Properties,
    pub chunk_id: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalExtraction {
    pub chunk_id: String,
    pub sequence_index: usize,
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub rejections: Vec<Rejection>,
}

impl CanonicalExtraction {
    pub fn empty(chunk_id: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            sequence_index,
            entities: Vec::new(),
            relationships: Vec::new(),
            rejections: Vec::new(),
        }
    }

    pub fn rejections_of(&self, subject: Subject) -> impl Iterator<Item = &Rejection> {
        self.rejections.iter().filter(move |r| r.subject == subject)
    }
}
