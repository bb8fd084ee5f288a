use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use extract::LlmClient;

/// LLM responses keyed by the SHA-256 of the prompt.
pub struct LlmResponseCache {
    responses: DashMap<String, String>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl LlmResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            responses: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, prompt: &str) -> Option<String> {
        let found = self
            .responses
            .get(&hash_prompt(prompt))
            .map(|r| r.value().clone());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, prompt: &str, response: String) {
        if self.responses.len() >= self.max_entries {
            // Clear a quarter when full
            let to_remove: Vec<_> = self
                .responses
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.responses.remove(&key);
            }
        }
        self.responses.insert(hash_prompt(prompt), response);
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.responses.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn hash_prompt(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// An [`LlmClient`] that answers repeated prompts from the cache. Only
/// successful responses are stored.
pub struct CachedLlm<L> {
    inner: L,
    cache: Arc<LlmResponseCache>,
}

impl<L> CachedLlm<L> {
    pub fn new(inner: L, cache: Arc<LlmResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<LlmResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl<L: LlmClient> LlmClient for CachedLlm<L> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Some(response) = self.cache.get(prompt) {
            debug!("LLM cache hit");
            return Ok(response);
        }
        let response = self.inner.complete(prompt).await?;
        self.cache.insert(prompt, response.clone());
        Ok(response)
    }
}
