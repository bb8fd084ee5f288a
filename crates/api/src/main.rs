mod cache;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use extract::{CancelHandle, CancelSignal, Extractor, LlmClient, Normalizer, OllamaClient, Schema};
use index::{DocumentReport, GraphStats, GraphStore, IngestPipeline, Neo4jStore};
use ingest::Document;

use crate::cache::{CacheStats, CachedLlm, LlmResponseCache};
use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot};

type Pipeline = IngestPipeline<Arc<dyn LlmClient>>;

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    schema: Arc<Schema>,
    metrics: Arc<Metrics>,
    cache: Option<Arc<LlmResponseCache>>,
    cancel: CancelSignal,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    store: String,
    schema: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestRequest {
    /// A file or a directory of text files on the server.
    Path { path: String },
    Text {
        document_id: String,
        text: String,
        #[serde(default)]
        source: Option<String>,
    },
}

#[derive(Serialize)]
struct DocumentError {
    document_id: String,
    error: String,
}

#[derive(Serialize)]
struct IngestResponse {
    reports: Vec<DocumentReport>,
    errors: Vec<DocumentError>,
}

#[derive(Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    pipeline: MetricsSnapshot,
    cache: Option<CacheStats>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing();

    let schema = Arc::new(config.load_schema().await?);
    info!(schema = %schema.name, labels = schema.node_types.len(), "Schema loaded");

    let store = Neo4jStore::connect(&config.neo4j.uri, &config.neo4j.user, &config.neo4j.password)
        .await?;
    store.init_schema(&schema).await?;

    let ollama = OllamaClient::with_timeout(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.request_timeout(),
    )?;
    let (llm, cache): (Arc<dyn LlmClient>, _) = if config.cache.enabled {
        let cache = Arc::new(LlmResponseCache::new(config.cache.max_entries));
        (Arc::new(CachedLlm::new(ollama, cache.clone())), Some(cache))
    } else {
        (Arc::new(ollama), None)
    };

    let extractor = Extractor::new(llm, Normalizer::new(config.normalizer_config()))
        .with_parse_retries(config.llm.parse_retries);
    let pipeline = IngestPipeline::new(extractor, Arc::new(store), config.pipeline_config())?;

    let (cancel_handle, cancel) = extract::cancel_pair();
    let state = Arc::new(AppState {
        pipeline,
        schema,
        metrics: Metrics::new(),
        cache,
        cancel,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel_handle))
        .await
        .context("Server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Cancels in-flight extractions on Ctrl-C before the server stops.
async fn shutdown_signal(cancel: CancelHandle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    warn!("Shutting down, cancelling in-flight documents");
    cancel.cancel();
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_documents))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (status, store) = match state.pipeline.store().health_check().await {
        Ok(_) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("error: {:#}", e)),
    };
    let response = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" }.to_string(),
        store,
        schema: state.schema.name.clone(),
    };
    (status, Json(response))
}

async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    let documents = match load_documents(req).await {
        Ok(documents) => documents,
        Err(status) => {
            state.metrics.record_request(false);
            return Err(status);
        }
    };
    let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    info!(documents = ids.len(), "Ingest request");

    let results = state
        .pipeline
        .ingest_batch(state.schema.clone(), documents, &state.cancel)
        .await;

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for (document_id, result) in ids.into_iter().zip(results) {
        match result {
            Ok(report) => {
                let elapsed = (report.finished_at - report.started_at)
                    .to_std()
                    .unwrap_or_default();
                state.metrics.record_document(&report, elapsed);
                reports.push(report);
            }
            Err(err) => {
                state.metrics.record_document_failure();
                errors.push(DocumentError {
                    document_id,
                    error: err.to_string(),
                });
            }
        }
    }

    state.metrics.record_request(errors.is_empty());
    Ok(Json(IngestResponse { reports, errors }))
}

async fn load_documents(req: IngestRequest) -> Result<Vec<Document>, StatusCode> {
    match req {
        IngestRequest::Text {
            document_id,
            text,
            source,
        } => {
            let source = source.unwrap_or_else(|| document_id.clone());
            Ok(vec![Document::new(document_id, source, text)])
        }
        IngestRequest::Path { path } => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(StatusCode::NOT_FOUND);
            }
            let loaded = if path.is_file() {
                ingest::load_document(&path).await.map(|d| vec![d])
            } else if path.is_dir() {
                ingest::load_directory(&path).await
            } else {
                return Err(StatusCode::BAD_REQUEST);
            };
            loaded.map_err(|e| {
                error!(path = %path.display(), error = %e, "Failed to load documents");
                StatusCode::UNPROCESSABLE_ENTITY
            })
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<GraphStats>, StatusCode> {
    let stats = state.pipeline.store().stats().await.map_err(|e| {
        error!(error = %e, "Failed to read graph stats");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(stats))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        pipeline: state.metrics.snapshot(),
        cache: state.cache.as_ref().map(|cache| cache.stats()),
    })
}
