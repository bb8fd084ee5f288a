pub mod chunk;
pub mod chunker;
pub mod error;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig, Chunks};
pub use error::ConfigError;
pub use reader::FileReader;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Plain text of one source document plus its opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            text: text.into(),
        }
    }

    /// Chunk this document, tagging each chunk with its source.
    pub fn chunk(&self, chunker: &Chunker) -> Vec<Chunk> {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), self.source.clone());
        chunker.chunk_text(&self.id, &self.text, metadata)
    }
}

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

pub async fn load_document(file_path: &Path) -> Result<Document> {
    let text = FileReader::read_file(file_path).await?;
    let source = file_path.to_string_lossy().to_string();
    Ok(Document::new(generate_doc_id(&source), source, text))
}

pub async fn load_directory(dir_path: &Path) -> Result<Vec<Document>> {
    let files = FileReader::read_directory(dir_path).await?;
    tracing::debug!(dir = %dir_path.display(), files = files.len(), "Loaded documents");

    Ok(files
        .into_iter()
        .map(|(source, text)| Document::new(generate_doc_id(&source), source, text))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_is_stable() {
        assert_eq!(generate_doc_id("a/b.txt"), generate_doc_id("a/b.txt"));
        assert_ne!(generate_doc_id("a/b.txt"), generate_doc_id("a/c.txt"));
    }

    #[test]
    fn test_document_chunks_carry_source() {
        let doc = Document::new("doc-1", "obc.txt", "Part 9 Housing");
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks = doc.chunk(&chunker);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.get("source").map(String::as_str), Some("obc.txt"));
    }
}
