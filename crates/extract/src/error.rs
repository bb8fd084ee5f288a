use thiserror::Error;

/// The declared schema is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("node label declared twice: {0}")]
    DuplicateLabel(String),

    #[error("relationship type declared twice: {0}")]
    DuplicateRelationshipType(String),

    #[error("relationship {rel_type} references undeclared node label {label}")]
    UndeclaredEndpoint { rel_type: String, label: String },

    #[error("property {property} declared twice on {owner}")]
    DuplicateProperty { owner: String, property: String },

    #[error("node type {label} has no declared identity property {property}")]
    MissingIdentityProperty { label: String, property: String },

    #[error("{0:?} is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("{0} is reserved by the graph store")]
    ReservedName(String),

    #[error("fallback label {0} is not a declared node type")]
    UnknownFallbackLabel(String),
}

/// No structured payload could be recovered from an LLM response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no structured payload in LLM output: {reason}")]
pub struct ParseError {
    pub reason: String,
    /// Leading part of the offending response, for reports.
    pub excerpt: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>, response: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: response.chars().take(200).collect(),
        }
    }
}

/// Chunk-level extraction failure. Never aborts the document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("LLM call failed: {0:#}")]
    Llm(anyhow::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("extraction task failed: {0}")]
    Task(String),
}
