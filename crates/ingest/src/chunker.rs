use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunk::Chunk;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window size in chars.
    pub chunk_size: usize,
    /// Chars shared by consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// Fixed-size sliding window chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily yield the chunks of `text` in document order.
    ///
    /// The iterator is cheap to clone; a clone restarts from wherever the
    /// original was when cloned, and calling `chunks` again restarts from
    /// the beginning.
    pub fn chunks<'a>(
        &self,
        doc_id: &'a str,
        text: &'a str,
        metadata: BTreeMap<String, String>,
    ) -> Chunks<'a> {
        // byte offset of every char boundary, including the end of the text
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        Chunks {
            config: self.config,
            doc_id,
            text,
            boundaries,
            metadata,
            next_start: Some(0),
            sequence_index: 0,
        }
    }

    pub fn chunk_text(
        &self,
        doc_id: &str,
        text: &str,
        metadata: BTreeMap<String, String>,
    ) -> Vec<Chunk> {
        self.chunks(doc_id, text, metadata).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    config: ChunkerConfig,
    doc_id: &'a str,
    text: &'a str,
    boundaries: Vec<usize>,
    metadata: BTreeMap<String, String>,
    next_start: Option<usize>,
    sequence_index: usize,
}

impl Chunks<'_> {
    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let len = self.char_len();

        // Short documents (and the empty one) are a single window.
        let end = if len <= self.config.chunk_size {
            len
        } else {
            (start + self.config.chunk_size).min(len)
        };

        let text = &self.text[self.boundaries[start]..self.boundaries[end]];
        let chunk = Chunk::new(
            self.doc_id.to_string(),
            self.sequence_index,
            text.to_string(),
            (start, end),
            self.sequence_index > 0,
            self.metadata.clone(),
        );

        // overlap < chunk_size, so a non-final window always moves forward
        self.next_start = if end >= len {
            None
        } else {
            Some(end - self.config.overlap)
        };
        self.sequence_index += 1;

        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
