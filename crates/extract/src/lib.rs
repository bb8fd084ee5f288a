pub mod canonical;
pub mod error;
pub mod llm;
pub mod normalizer;
pub mod payload;
pub mod pool;
pub mod presets;
pub mod prompt;
pub mod schema;
pub mod value;

pub use canonical::{
    CanonicalEntity, CanonicalExtraction, CanonicalRelationship, Properties, Rejection,
    RejectionKind, Subject,
};
pub use error::{ExtractError, ParseError, SchemaError};
pub use llm::{LlmClient, OllamaClient, ScriptedLlm};
pub use normalizer::{Normalizer, NormalizerConfig, dedup_key, normalize_identity};
pub use payload::{RawEntity, RawExtraction, RawRelationship};
pub use pool::{
    CancelHandle, CancelSignal, Cancelled, ChunkOutcome, ExtractionPool, PoolConfig, RateLimiter,
    cancel_pair,
};
pub use schema::{
    DOCUMENT_LABEL, NodeType, PropertyDef, PropertyType, RESERVED_LABELS, RESERVED_PROPERTIES,
    RelationshipType, Schema,
};
pub use value::{CoercionError, PropertyValue};

use ingest::Chunk;
use tracing::{debug, warn};

/// How often a response without a payload is sent back for repair.
pub const DEFAULT_PARSE_RETRIES: usize = 1;

/// One LLM round trip per chunk, normalized against the schema.
pub struct Extractor<L> {
    llm: L,
    normalizer: Normalizer,
    parse_retries: usize,
}

impl<L: LlmClient> Extractor<L> {
    pub fn new(llm: L, normalizer: Normalizer) -> Self {
        Self {
            llm,
            normalizer,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_parse_retries(mut self, parse_retries: usize) -> Self {
        self.parse_retries = parse_retries;
        self
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Extract a chunk. Blank chunks never reach the LLM.
    pub async fn extract_chunk(
        &self,
        schema: &Schema,
        chunk: &Chunk,
    ) -> Result<CanonicalExtraction, ExtractError> {
        if chunk.is_blank() {
            debug!(chunk_id = %chunk.id, "Skipping blank chunk");
            return Ok(CanonicalExtraction::empty(&chunk.id, chunk.sequence_index));
        }

        let prompt = prompt::build_extraction_prompt(schema, &chunk.text);
        let mut response = self.llm.complete(&prompt).await.map_err(ExtractError::Llm)?;

        let mut attempt = 0;
        loop {
            match RawExtraction::parse(&response) {
                Ok(raw) => {
                    return Ok(self.normalizer.normalize(
                        schema,
                        &chunk.id,
                        chunk.sequence_index,
                        &raw,
                    ));
                }
                Err(err) if attempt < self.parse_retries => {
                    attempt += 1;
                    warn!(
                        chunk_id = %chunk.id,
                        attempt,
                        reason = %err.reason,
                        "No payload in LLM output, asking for a repair"
                    );
                    let retry = prompt::build_retry_prompt(&response);
                    response = self.llm.complete(&retry).await.map_err(ExtractError::Llm)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::legal_document_schema;
    use std::collections::BTreeMap;

    fn chunk(text: &str) -> Chunk {
        Chunk::new(
            "doc".to_string(),
            2,
            text.to_string(),
            (0, text.chars().count()),
            false,
            BTreeMap::new(),
        )
    }

    const ACME: &str = r#"{"entities": [{"id": "e1", "label": "Organization", "name": "Acme Corp"}], "relationships": []}"#;

    #[tokio::test]
    async fn test_extracts_and_normalizes() {
        let llm = ScriptedLlm::new().respond("Acme", ACME);
        let extractor = Extractor::new(llm, Normalizer::default());

        let out = extractor
            .extract_chunk(&legal_document_schema(), &chunk("Acme Corp shall deliver."))
            .await
            .unwrap();
        assert_eq!(out.sequence_index, 2);
        assert_eq!(out.entities[0].dedup_key, "organization:acme corp");
    }

    #[tokio::test]
    async fn test_repairs_unparseable_output_once() {
        let llm = ScriptedLlm::new()
            .respond("does not contain a valid JSON object", ACME)
            .with_fallback("Sorry, here are the entities: Acme");
        let extractor = Extractor::new(llm, Normalizer::default());

        let out = extractor
            .extract_chunk(&legal_document_schema(), &chunk("Acme Corp"))
            .await
            .unwrap();
        assert_eq!(out.entities.len(), 1);
        assert_eq!(extractor.llm().call_count(), 2);
    }

    #[tokio::test]
    async fn test_parse_error_after_retries() {
        let llm = ScriptedLlm::new().with_fallback("no json at all");
        let extractor = Extractor::new(llm, Normalizer::default()).with_parse_retries(2);

        let err = extractor
            .extract_chunk(&legal_document_schema(), &chunk("text"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
        assert_eq!(extractor.llm().call_count(), 3);
    }

    #[tokio::test]
    async fn test_llm_failure_is_reported() {
        let llm = ScriptedLlm::new().fail_on("TEXT:", "connection refused");
        let extractor = Extractor::new(llm, Normalizer::default());

        let err = extractor
            .extract_chunk(&legal_document_schema(), &chunk("text"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_blank_chunk_skips_llm() {
        let llm = ScriptedLlm::new();
        let extractor = Extractor::new(llm, Normalizer::default());

        let out = extractor
            .extract_chunk(&legal_document_schema(), &chunk("   \n "))
            .await
            .unwrap();
        assert!(out.entities.is_empty());
        assert_eq!(extractor.llm().call_count(), 0);
    }
}
