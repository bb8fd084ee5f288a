//! Per-document driver: chunk, extract, build, apply.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use extract::{
    CancelSignal, CanonicalExtraction, Cancelled, ExtractionPool, Extractor, LlmClient,
    PoolConfig, Rejection, Schema, SchemaError, Subject,
};
use ingest::{Chunker, ChunkerConfig, ConfigError, Document};

use crate::applier::{MutationApplier, WriteFailure};
use crate::builder::{BuildError, GraphBuilder};
use crate::mutation::MergePolicy;
use crate::retry::RetryPolicy;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    pub pool: PoolConfig,
    pub merge_policy: MergePolicy,
    pub retry: RetryPolicy,
    pub max_concurrent_documents: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            pool: PoolConfig::default(),
            merge_policy: MergePolicy::default(),
            retry: RetryPolicy::default(),
            max_concurrent_documents: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("document task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub reason: String,
}

/// What one document did to the graph, and everything that was dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub run_id: Uuid,
    pub document_id: String,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub rejected_entities: Vec<Rejection>,
    pub rejected_relationships: Vec<Rejection>,
    pub dangling_references: Vec<Rejection>,
    pub property_issues: Vec<Rejection>,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub chunk_failures: Vec<ChunkFailure>,
    pub write_failures: Vec<WriteFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DocumentReport {
    pub fn rejection_count(&self) -> usize {
        self.rejected_entities.len()
            + self.rejected_relationships.len()
            + self.dangling_references.len()
            + self.property_issues.len()
    }
}

pub struct IngestPipeline<L> {
    chunker: Chunker,
    pool: ExtractionPool<L>,
    builder: GraphBuilder,
    applier: MutationApplier,
    documents: Arc<Semaphore>,
}

impl<L> Clone for IngestPipeline<L> {
    fn clone(&self) -> Self {
        Self {
            chunker: self.chunker.clone(),
            pool: self.pool.clone(),
            builder: self.builder,
            applier: self.applier.clone(),
            documents: self.documents.clone(),
        }
    }
}

impl<L: LlmClient + 'static> IngestPipeline<L> {
    /// Fails with [`PipelineError::Config`] before anything runs when the
    /// chunking parameters are invalid.
    pub fn new(
        extractor: Extractor<L>,
        store: Arc<dyn GraphStore>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let chunker = Chunker::new(config.chunker)?;
        Ok(Self {
            chunker,
            pool: ExtractionPool::new(extractor, config.pool),
            builder: GraphBuilder::new(config.merge_policy),
            applier: MutationApplier::new(store, config.retry),
            documents: Arc::new(Semaphore::new(config.max_concurrent_documents.max(1))),
        })
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        self.applier.store()
    }

    pub async fn ingest_document(
        &self,
        schema: Arc<Schema>,
        document: &Document,
        cancel: &CancelSignal,
    ) -> Result<DocumentReport, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        schema.validate()?;
        self.pool.extractor().normalizer().config().validate(&schema)?;

        let chunks = document.chunk(&self.chunker);
        let chunks_total = chunks.len();
        info!(
            document_id = %document.id,
            %run_id,
            chunks = chunks_total,
            "Ingesting document"
        );

        let outcomes = self.pool.run(schema.clone(), chunks, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        let mut extractions: Vec<CanonicalExtraction> = Vec::with_capacity(outcomes.len());
        let mut chunk_failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(extraction) => extractions.push(extraction),
                Err(err) => chunk_failures.push(ChunkFailure {
                    chunk_id: outcome.chunk_id,
                    reason: err.to_string(),
                }),
            }
        }

        let mut built = self.builder.build(&schema, &document.id, &extractions)?;
        built.mutation.document_source = document.source.clone();

        let applied = self.applier.apply(&built.mutation).await;

        let mut rejected_entities = Vec::new();
        let mut rejected_relationships = Vec::new();
        let mut property_issues = Vec::new();
        for extraction in extractions {
            for rejection in extraction.rejections {
                match rejection.subject {
                    Subject::Entity => rejected_entities.push(rejection),
                    Subject::Relationship => rejected_relationships.push(rejection),
                    Subject::Property => property_issues.push(rejection),
                }
            }
        }

        let report = DocumentReport {
            run_id,
            document_id: document.id.clone(),
            nodes_created: applied.nodes_created,
            nodes_updated: applied.nodes_updated,
            relationships_created: applied.relationships_created,
            relationships_updated: applied.relationships_updated,
            rejected_entities,
            rejected_relationships,
            dangling_references: built.dangling_references,
            property_issues,
            chunks_total,
            chunks_failed: chunk_failures.len(),
            chunk_failures,
            write_failures: applied.failure_reasons,
            started_at,
            finished_at: Utc::now(),
        };

        if report.chunks_failed > 0 || !report.write_failures.is_empty() {
            warn!(
                document_id = %report.document_id,
                chunks_failed = report.chunks_failed,
                write_failures = report.write_failures.len(),
                "Document ingested with failures"
            );
        }
        info!(
            document_id = %report.document_id,
            %run_id,
            nodes_created = report.nodes_created,
            nodes_updated = report.nodes_updated,
            relationships_created = report.relationships_created,
            relationships_updated = report.relationships_updated,
            rejections = report.rejection_count(),
            "Document ingested"
        );
        Ok(report)
    }

    /// Ingest independent documents concurrently. Results line up with
    /// `documents`; one document failing never affects another.
    pub async fn ingest_batch(
        &self,
        schema: Arc<Schema>,
        documents: Vec<Document>,
        cancel: &CancelSignal,
    ) -> Vec<Result<DocumentReport, PipelineError>> {
        let total = documents.len();
        let mut tasks = JoinSet::new();
        for (index, document) in documents.into_iter().enumerate() {
            let pipeline = self.clone();
            let schema = schema.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match pipeline.documents.clone().acquire_owned().await {
                    Ok(_permit) => pipeline.ingest_document(schema, &document, &cancel).await,
                    Err(err) => Err(PipelineError::Task(err.to_string())),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<DocumentReport, PipelineError>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Err(err) = &result {
                        error!(error = %err, "Document ingestion failed");
                    }
                    results[index] = Some(result);
                }
                Err(err) => error!(error = ?err, "Document task panicked"),
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(PipelineError::Task("task panicked".into())))
            })
            .collect()
    }
}
