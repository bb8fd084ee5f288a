use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use index::DocumentReport;

#[derive(Default)]
pub struct Metrics {
    // Requests
    total_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Documents
    documents_ingested: AtomicUsize,
    documents_failed: AtomicUsize,
    total_ingest_time_us: AtomicU64,

    // Chunks
    chunks_processed: AtomicUsize,
    chunks_failed: AtomicUsize,

    // Graph
    nodes_written: AtomicUsize,
    relationships_written: AtomicUsize,
    rejections: AtomicUsize,
    write_failures: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_document(&self, report: &DocumentReport, duration: Duration) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_processed
            .fetch_add(report.chunks_total, Ordering::Relaxed);
        self.chunks_failed
            .fetch_add(report.chunks_failed, Ordering::Relaxed);
        self.nodes_written.fetch_add(
            report.nodes_created + report.nodes_updated,
            Ordering::Relaxed,
        );
        self.relationships_written.fetch_add(
            report.relationships_created + report.relationships_updated,
            Ordering::Relaxed,
        );
        self.rejections
            .fetch_add(report.rejection_count(), Ordering::Relaxed);
        self.write_failures
            .fetch_add(report.write_failures.len(), Ordering::Relaxed);
    }

    pub fn record_document_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents = self.documents_ingested.load(Ordering::Relaxed);
        let total_us = self.total_ingest_time_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            documents_ingested: documents,
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            avg_document_time_ms: if documents > 0 {
                total_us as f64 / documents as f64 / 1000.0
            } else {
                0.0
            },
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            nodes_written: self.nodes_written.load(Ordering::Relaxed),
            relationships_written: self.relationships_written.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub documents_ingested: usize,
    pub documents_failed: usize,
    pub avg_document_time_ms: f64,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub rejections: usize,
    pub write_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn report() -> DocumentReport {
        DocumentReport {
            run_id: Uuid::new_v4(),
            document_id: "doc".into(),
            nodes_created: 2,
            nodes_updated: 1,
            relationships_created: 1,
            relationships_updated: 0,
            rejected_entities: Vec::new(),
            rejected_relationships: Vec::new(),
            dangling_references: Vec::new(),
            property_issues: Vec::new(),
            chunks_total: 4,
            chunks_failed: 1,
            chunk_failures: Vec::new(),
            write_failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_document_counters() {
        let metrics = Metrics::new();
        metrics.record_document(&report(), Duration::from_millis(40));
        metrics.record_document(&report(), Duration::from_millis(20));
        metrics.record_document_failure();
        metrics.record_request(true);
        metrics.record_request(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.chunks_processed, 8);
        assert_eq!(snapshot.chunks_failed, 2);
        assert_eq!(snapshot.nodes_written, 6);
        assert_eq!(snapshot.relationships_written, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.avg_document_time_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.avg_document_time_ms, 0.0);
    }
}
