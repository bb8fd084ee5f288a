use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One extraction window over a document.
///
/// Offsets are char positions into the source text, `start_offset`
/// inclusive and `end_offset` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_document_id: String,
    pub sequence_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub overlap_with_prev: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(
        source_document_id: String,
        sequence_index: usize,
        text: String,
        offset: (usize, usize),
        overlap_with_prev: bool,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        // Generate stable chunk id from content
        let id = Self::generate_chunk_id(&source_document_id, &text, offset);

        Self {
            id,
            source_document_id,
            sequence_index,
            start_offset: offset.0,
            end_offset: offset.1,
            text,
            overlap_with_prev,
            metadata,
        }
    }

    fn generate_chunk_id(doc_id: &str, text: &str, offset: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(offset.0.to_string().as_bytes());
        hasher.update(offset.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the chunk carries nothing worth sending to the extractor.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
