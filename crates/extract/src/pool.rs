//! Bounded, rate-limited extraction of a document's chunks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

use ingest::Chunk;

use crate::canonical::CanonicalExtraction;
use crate::error::ExtractError;
use crate::llm::LlmClient;
use crate::schema::Schema;
use crate::Extractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    /// Minimum spacing between the starts of two LLM calls.
    pub min_call_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_call_interval: Duration::from_millis(1000),
        }
    }
}

/// Hands out call slots at least `interval` apart.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let start = match *next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        sleep_until(start).await;
        *next_slot = Some(start + self.interval);
    }
}

/// Fires the paired [`CancelSignal`]s.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The document was cancelled; every partial result was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("extraction cancelled")]
pub struct Cancelled;

#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunk_id: String,
    pub sequence_index: usize,
    pub result: Result<CanonicalExtraction, ExtractError>,
}

pub struct ExtractionPool<L> {
    extractor: Arc<Extractor<L>>,
    semaphore: Arc<Semaphore>,
    limiter: Arc<RateLimiter>,
}

impl<L> Clone for ExtractionPool<L> {
    fn clone(&self) -> Self {
        Self {
            extractor: self.extractor.clone(),
            semaphore: self.semaphore.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<L: LlmClient + 'static> ExtractionPool<L> {
    pub fn new(extractor: Extractor<L>, config: PoolConfig) -> Self {
        Self {
            extractor: Arc::new(extractor),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            limiter: Arc::new(RateLimiter::new(config.min_call_interval)),
        }
    }

    pub fn extractor(&self) -> &Extractor<L> {
        &self.extractor
    }

    /// Extract every chunk, one LLM call each.
    ///
    /// Outcomes come back sorted by `sequence_index` whatever order they
    /// finished in. On cancellation nothing is returned.
    pub async fn run(
        &self,
        schema: Arc<Schema>,
        chunks: Vec<Chunk>,
        cancel: &CancelSignal,
    ) -> Result<Vec<ChunkOutcome>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let mut pending: BTreeMap<usize, String> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for chunk in chunks {
            pending.insert(chunk.sequence_index, chunk.id.clone());

            let extractor = self.extractor.clone();
            let semaphore = self.semaphore.clone();
            let limiter = self.limiter.clone();
            let schema = schema.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        limiter.acquire().await;
                        extractor.extract_chunk(&schema, &chunk).await
                    }
                    Err(err) => Err(ExtractError::Task(err.to_string())),
                };
                ChunkOutcome {
                    chunk_id: chunk.id,
                    sequence_index: chunk.sequence_index,
                    result,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    warn!(
                        completed = outcomes.len(),
                        outstanding = pending.len(),
                        "Extraction cancelled, discarding partial results"
                    );
                    return Err(Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        pending.remove(&outcome.sequence_index);
                        if let Err(err) = &outcome.result {
                            warn!(chunk_id = %outcome.chunk_id, error = %err, "Chunk extraction failed");
                        }
                        outcomes.push(outcome);
                    }
                    Some(Err(err)) => error!(error = ?err, "Extraction task panicked"),
                    None => break,
                },
            }
        }

        // Whatever is still pending belongs to a task that panicked.
        for (sequence_index, chunk_id) in pending {
            outcomes.push(ChunkOutcome {
                chunk_id,
                sequence_index,
                result: Err(ExtractError::Task("task panicked".into())),
            });
        }

        outcomes.sort_by_key(|o| o.sequence_index);
        debug!(chunks = outcomes.len(), "Extraction finished");
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::normalizer::Normalizer;
    use crate::presets::legal_document_schema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Chunk::new(
                    "doc".to_string(),
                    i,
                    text.to_string(),
                    (i * 10, i * 10 + text.chars().count()),
                    i > 0,
                    BTreeMap::new(),
                )
            })
            .collect()
    }

    fn pool<L: LlmClient + 'static>(llm: L, config: PoolConfig) -> ExtractionPool<L> {
        ExtractionPool::new(Extractor::new(llm, Normalizer::default()), config)
    }

    /// Tracks how many calls are in flight at once.
    #[derive(Default)]
    struct Probe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for Probe {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(r#"{"entities": []}"#.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_sorted_by_sequence() {
        let llm = ScriptedLlm::new()
            .fail_on("second", "boom")
            .with_fallback(r#"{"entities": [{"id": "o", "label": "Organization", "name": "Acme"}]}"#);
        let pool = pool(
            llm,
            PoolConfig {
                max_concurrent: 3,
                min_call_interval: Duration::from_millis(50),
            },
        );

        let started = Instant::now();
        let outcomes = pool
            .run(
                Arc::new(legal_document_schema()),
                chunks(&["first", "second", "third", "fourth"]),
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        let order: Vec<usize> = outcomes.iter().map(|o| o.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(outcomes[1].result.is_err());
        assert_eq!(outcomes[3].result.as_ref().unwrap().entities.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let probe = Arc::new(Probe::default());
        let pool = pool(
            probe.clone(),
            PoolConfig {
                max_concurrent: 2,
                min_call_interval: Duration::ZERO,
            },
        );

        let outcomes = pool
            .run(
                Arc::new(legal_document_schema()),
                chunks(&["a", "b", "c", "d", "e"]),
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_discards_everything() {
        let llm = ScriptedLlm::new()
            .with_fallback(r#"{"entities": []}"#)
            .with_latency(Duration::from_secs(10));
        let pool = pool(llm, PoolConfig::default());
        let (handle, signal) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });

        let result = pool
            .run(Arc::new(legal_document_schema()), chunks(&["a", "b"]), &signal)
            .await;
        assert_eq!(result.unwrap_err(), Cancelled);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_calls() {
        let llm = ScriptedLlm::new().with_fallback("{}");
        let pool = pool(llm, PoolConfig::default());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let result = pool
            .run(Arc::new(legal_document_schema()), chunks(&["a"]), &signal)
            .await;
        assert!(result.is_err());
        assert_eq!(pool.extractor().llm().call_count(), 0);
    }
}
