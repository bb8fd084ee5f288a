use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use extract::Properties;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelRef {
    pub rel_type: String,
    pub source: NodeRef,
    pub target: NodeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<R> {
    pub reference: R,
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreWriteError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("endpoint node {label} {key} does not exist")]
    MissingEndpoint { label: String, key: String },

    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
    pub document_count: usize,
    pub nodes_by_label: BTreeMap<String, usize>,
}

/// The graph database as the applier sees it. Both upserts must be
/// idempotent: repeating one never creates a second node or edge.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Match-or-create by `(label, key)`, then merge `properties` in.
    async fn upsert_node(
        &self,
        label: &str,
        key: &str,
        properties: &Properties,
    ) -> Result<Upserted<NodeRef>, StoreWriteError>;

    /// Match-or-create by `(source, rel_type, target)`.
    async fn upsert_relationship(
        &self,
        rel_type: &str,
        source: &NodeRef,
        target: &NodeRef,
        properties: &Properties,
    ) -> Result<Upserted<RelRef>, StoreWriteError>;

    /// Record which nodes a document contributed.
    async fn link_document(
        &self,
        document_id: &str,
        source: &str,
        nodes: &[NodeRef],
    ) -> Result<(), StoreWriteError>;

    async fn stats(&self) -> Result<GraphStats>;

    /// Cheap round trip proving the store answers queries.
    async fn health_check(&self) -> Result<()>;
}

/// Full structural copy of an in-memory graph, for diffs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<NodeRef, Properties>,
    pub relationships: BTreeMap<RelRef, Properties>,
    pub documents: BTreeMap<String, BTreeSet<NodeRef>>,
}

/// Deterministic store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: Mutex<GraphSnapshot>,
    fail_next: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Write attempts so far, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph().clone()
    }

    fn graph(&self) -> MutexGuard<'_, GraphSnapshot> {
        self.graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_write(&self) -> Result<(), StoreWriteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StoreWriteError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(
        &self,
        label: &str,
        key: &str,
        properties: &Properties,
    ) -> Result<Upserted<NodeRef>, StoreWriteError> {
        self.begin_write()?;
        let reference = NodeRef::new(label, key);
        let mut graph = self.graph();
        let outcome = match graph.nodes.get_mut(&reference) {
            Some(existing) => {
                existing.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
                UpsertOutcome::Updated
            }
            None => {
                graph.nodes.insert(reference.clone(), properties.clone());
                UpsertOutcome::Created
            }
        };
        Ok(Upserted { reference, outcome })
    }

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        source: &NodeRef,
        target: &NodeRef,
        properties: &Properties,
    ) -> Result<Upserted<RelRef>, StoreWriteError> {
        self.begin_write()?;
        let mut graph = self.graph();
        for endpoint in [source, target] {
            if !graph.nodes.contains_key(endpoint) {
                return Err(StoreWriteError::MissingEndpoint {
                    label: endpoint.label.clone(),
                    key: endpoint.key.clone(),
                });
            }
        }

        let reference = RelRef {
            rel_type: rel_type.to_string(),
            source: source.clone(),
            target: target.clone(),
        };
        let outcome = match graph.relationships.get_mut(&reference) {
            Some(existing) => {
                existing.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
                UpsertOutcome::Updated
            }
            None => {
                graph.relationships.insert(reference.clone(), properties.clone());
                UpsertOutcome::Created
            }
        };
        Ok(Upserted { reference, outcome })
    }

    async fn link_document(
        &self,
        document_id: &str,
        _source: &str,
        nodes: &[NodeRef],
    ) -> Result<(), StoreWriteError> {
        self.begin_write()?;
        let mut graph = self.graph();
        graph
            .documents
            .entry(document_id.to_string())
            .or_default()
            .extend(nodes.iter().cloned());
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let graph = self.graph();
        let mut nodes_by_label = BTreeMap::new();
        for node in graph.nodes.keys() {
            *nodes_by_label.entry(node.label.clone()).or_insert(0) += 1;
        }
        Ok(GraphStats {
            node_count: graph.nodes.len(),
            relationship_count: graph.relationships.len(),
            document_count: graph.documents.len(),
            nodes_by_label,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            anyhow::bail!("store unavailable ({} injected failures pending)", pending);
        }
        Ok(())
    }
}
