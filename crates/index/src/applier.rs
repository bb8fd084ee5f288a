//! Writes a graph mutation with per-item retries and partial-failure
//! reporting.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::mutation::GraphMutation;
use crate::retry::RetryPolicy;
use crate::store::{GraphStore, NodeRef, UpsertOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    /// Human-readable identity of the item, e.g. `Company company:acme`.
    pub item: String,
    pub reason: String,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failure_reasons: Vec<WriteFailure>,
}

impl ApplyReport {
    fn record(&mut self, outcome: UpsertOutcome, node: bool) {
        self.succeeded += 1;
        match (node, outcome) {
            (true, UpsertOutcome::Created) => self.nodes_created += 1,
            (true, UpsertOutcome::Updated) => self.nodes_updated += 1,
            (false, UpsertOutcome::Created) => self.relationships_created += 1,
            (false, UpsertOutcome::Updated) => self.relationships_updated += 1,
        }
    }

    fn fail(&mut self, item: String, reason: String, attempts: usize) {
        self.failed += 1;
        self.failure_reasons.push(WriteFailure {
            item,
            reason,
            attempts,
        });
    }
}

#[derive(Clone)]
pub struct MutationApplier {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
}

impl MutationApplier {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Apply nodes in order, then relationships. Never aborts: a failed
    /// item is reported and the rest of the batch still runs.
    pub async fn apply(&self, mutation: &GraphMutation) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut written: Vec<NodeRef> = Vec::with_capacity(mutation.nodes.len());
        let mut failed_nodes: HashSet<(&str, &str)> = HashSet::new();

        for node in &mutation.nodes {
            let item = format!("{} {}", node.label, node.store_key);
            let result = self
                .retry
                .retry("upsert_node", || {
                    self.store
                        .upsert_node(&node.label, &node.store_key, &node.properties)
                })
                .await;
            match result {
                Ok(upserted) => {
                    report.record(upserted.outcome, true);
                    written.push(upserted.reference);
                }
                Err((err, attempts)) => {
                    failed_nodes.insert((node.label.as_str(), node.store_key.as_str()));
                    report.fail(item, err.to_string(), attempts);
                }
            }
        }

        let written_refs: HashMap<(&str, &str), &NodeRef> = written
            .iter()
            .map(|r| ((r.label.as_str(), r.key.as_str()), r))
            .collect();

        for rel in &mutation.relationships {
            let item = format!(
                "({})-[{}]->({})",
                rel.source_key, rel.rel_type, rel.target_key
            );
            let source = (rel.source_label.as_str(), rel.source_key.as_str());
            let target = (rel.target_label.as_str(), rel.target_key.as_str());

            if failed_nodes.contains(&source) || failed_nodes.contains(&target) {
                report.fail(item, "endpoint node write failed".to_string(), 0);
                continue;
            }

            let source = written_refs
                .get(&source)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| NodeRef::new(source.0, source.1));
            let target = written_refs
                .get(&target)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| NodeRef::new(target.0, target.1));

            let result = self
                .retry
                .retry("upsert_relationship", || {
                    self.store
                        .upsert_relationship(&rel.rel_type, &source, &target, &rel.properties)
                })
                .await;
            match result {
                Ok(upserted) => report.record(upserted.outcome, false),
                Err((err, attempts)) => report.fail(item, err.to_string(), attempts),
            }
        }

        if !written.is_empty() {
            let linked = self
                .retry
                .retry("link_document", || {
                    self.store
                        .link_document(&mutation.document_id, &mutation.document_source, &written)
                })
                .await;
            if let Err((err, attempts)) = linked {
                warn!(document_id = %mutation.document_id, error = %err, "Failed to link document");
                report.fail(
                    format!("document {}", mutation.document_id),
                    err.to_string(),
                    attempts,
                );
            }
        }

        debug!(
            document_id = %mutation.document_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "Applied graph mutation"
        );
        report
    }
}
