use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use extract::presets;
use extract::{NormalizerConfig, PoolConfig, Schema};
use index::{MergePolicy, PipelineConfig, RetryPolicy};
use ingest::ChunkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub neo4j: Neo4jConfig,
    pub llm: LlmConfig,
    pub chunking: ChunkerConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub normalizer: NormalizationConfig,
    /// JSON schema file. Takes precedence over `schema_preset`.
    pub schema_path: Option<PathBuf>,
    pub schema_preset: String,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub parse_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
    pub min_call_interval_ms: u64,
    pub max_concurrent_documents: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total write attempts per item.
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub fallback_label: Option<String>,
    pub keep_undeclared: bool,
    pub merge_policy: MergePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            neo4j: Neo4jConfig {
                uri: "bolt://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: "neo4j".to_string(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                parse_retries: extract::DEFAULT_PARSE_RETRIES,
            },
            chunking: ChunkerConfig::default(),
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 4,
                min_call_interval_ms: 1000,
                max_concurrent_documents: 2,
                request_timeout_secs: 60,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            normalizer: NormalizationConfig {
                fallback_label: None,
                keep_undeclared: false,
                merge_policy: MergePolicy::FirstNonNullWins,
            },
            schema_path: None,
            schema_preset: "legal".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        override_string(&lookup, "NEO4J_URI", &mut config.neo4j.uri);
        override_string(&lookup, "NEO4J_USER", &mut config.neo4j.user);
        override_string(&lookup, "NEO4J_PASSWORD", &mut config.neo4j.password);

        override_string(&lookup, "LLM_BASE_URL", &mut config.llm.base_url);
        override_string(&lookup, "LLM_MODEL", &mut config.llm.model);
        override_parsed(&lookup, "LLM_PARSE_RETRIES", &mut config.llm.parse_retries)?;

        override_parsed(&lookup, "CHUNK_SIZE", &mut config.chunking.chunk_size)?;
        override_parsed(&lookup, "CHUNK_OVERLAP", &mut config.chunking.overlap)?;

        let concurrency = &mut config.concurrency;
        override_parsed(&lookup, "MAX_CONCURRENT_LLM_CALLS", &mut concurrency.max_concurrent_llm_calls)?;
        override_parsed(&lookup, "MIN_CALL_INTERVAL_MS", &mut concurrency.min_call_interval_ms)?;
        override_parsed(&lookup, "MAX_CONCURRENT_DOCUMENTS", &mut concurrency.max_concurrent_documents)?;
        override_parsed(&lookup, "REQUEST_TIMEOUT_SECS", &mut concurrency.request_timeout_secs)?;

        override_parsed(&lookup, "MAX_RETRIES", &mut config.retry.max_retries)?;
        override_parsed(&lookup, "INITIAL_BACKOFF_MS", &mut config.retry.initial_backoff_ms)?;
        override_parsed(&lookup, "MAX_BACKOFF_MS", &mut config.retry.max_backoff_ms)?;

        override_parsed(&lookup, "CACHE_ENABLED", &mut config.cache.enabled)?;
        override_parsed(&lookup, "CACHE_MAX_ENTRIES", &mut config.cache.max_entries)?;

        if let Some(label) = lookup("FALLBACK_LABEL").filter(|v| !v.trim().is_empty()) {
            config.normalizer.fallback_label = Some(label.trim().to_string());
        }
        override_parsed(&lookup, "KEEP_UNDECLARED", &mut config.normalizer.keep_undeclared)?;
        if let Some(policy) = lookup("MERGE_POLICY") {
            config.normalizer.merge_policy = parse_merge_policy(&policy)?;
        }

        if let Some(path) = lookup("SCHEMA_PATH").filter(|v| !v.trim().is_empty()) {
            config.schema_path = Some(PathBuf::from(path));
        }
        override_string(&lookup, "SCHEMA_PRESET", &mut config.schema_preset);
        override_string(&lookup, "BIND_ADDR", &mut config.bind_addr);

        config
            .chunking
            .validate()
            .context("Invalid chunking configuration")?;
        Ok(config)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunker: self.chunking,
            pool: PoolConfig {
                max_concurrent: self.concurrency.max_concurrent_llm_calls,
                min_call_interval: Duration::from_millis(self.concurrency.min_call_interval_ms),
            },
            merge_policy: self.normalizer.merge_policy,
            retry: RetryPolicy::new(
                self.retry.max_retries,
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms,
            ),
            max_concurrent_documents: self.concurrency.max_concurrent_documents,
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            fallback_label: self.normalizer.fallback_label.clone(),
            keep_undeclared: self.normalizer.keep_undeclared,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_secs)
    }

    /// Load and validate the configured schema.
    pub async fn load_schema(&self) -> Result<Schema> {
        let schema = match &self.schema_path {
            Some(path) => Schema::from_json_file(path).await?,
            None => presets::by_name(&self.schema_preset).with_context(|| {
                format!("Unknown schema preset: {:?}", self.schema_preset)
            })?,
        };
        self.normalizer_config()
            .validate(&schema)
            .context("Normalizer configuration does not match the schema")?;
        Ok(schema)
    }
}

fn override_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = lookup(key) {
        *target = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, value))?;
    }
    Ok(())
}

fn parse_merge_policy(value: &str) -> Result<MergePolicy> {
    match value.trim().to_lowercase().as_str() {
        "first_non_null_wins" | "first" => Ok(MergePolicy::FirstNonNullWins),
        "last_non_null_wins" | "last" => Ok(MergePolicy::LastNonNullWins),
        other => anyhow::bail!("Invalid value for MERGE_POLICY: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::presets::{building_code_schema, legal_document_schema};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.chunking, ChunkerConfig::default());
        assert_eq!(config.concurrency.min_call_interval_ms, 1000);
        assert_eq!(config.normalizer.merge_policy, MergePolicy::FirstNonNullWins);
        assert!(config.schema_path.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CHUNK_SIZE", "100"),
            ("CHUNK_OVERLAP", "20"),
            ("MAX_RETRIES", "5"),
            ("MERGE_POLICY", "last_non_null_wins"),
            ("FALLBACK_LABEL", "Unknown"),
            ("CACHE_ENABLED", "false"),
        ]))
        .unwrap();

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.chunker.chunk_size, 100);
        assert_eq!(pipeline.chunker.overlap, 20);
        assert_eq!(pipeline.retry.max_attempts, 5);
        assert_eq!(pipeline.merge_policy, MergePolicy::LastNonNullWins);
        assert_eq!(config.normalizer_config().fallback_label.as_deref(), Some("Unknown"));
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_invalid_chunking_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("CHUNK_SIZE", "10"), ("CHUNK_OVERLAP", "10")]))
            .unwrap_err();
        assert!(err.to_string().contains("chunking"));
    }

    #[test]
    fn test_unparseable_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("CHUNK_SIZE", "big")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("MERGE_POLICY", "random")])).is_err());
    }

    #[tokio::test]
    async fn test_unknown_fallback_label_fails_schema_load() {
        let config = AppConfig::from_lookup(lookup(&[("FALLBACK_LABEL", "Planet")])).unwrap();
        assert!(config.load_schema().await.is_err());
    }

    #[tokio::test]
    async fn test_schema_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let json = serde_json::to_string(&legal_document_schema()).unwrap();
        tokio::fs::write(&path, json).await.unwrap();

        let config =
            AppConfig::from_lookup(lookup(&[("SCHEMA_PATH", path.to_str().unwrap())])).unwrap();
        let schema = config.load_schema().await.unwrap();
        assert_eq!(schema, legal_document_schema());
    }

    #[tokio::test]
    async fn test_schema_preset_selection() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.load_schema().await.unwrap(), legal_document_schema());

        let config =
            AppConfig::from_lookup(lookup(&[("SCHEMA_PRESET", "building_code")])).unwrap();
        assert_eq!(config.load_schema().await.unwrap(), building_code_schema());

        let config = AppConfig::from_lookup(lookup(&[("SCHEMA_PRESET", "medical")])).unwrap();
        assert!(config.load_schema().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_schema_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let json = r#"{"name": "s", "node_types": [
            {"label": "Person", "properties": [{"name": "name", "type": "string"}]},
            {"label": "PERSON", "properties": [{"name": "name", "type": "string"}]}
        ]}"#;
        tokio::fs::write(&path, json).await.unwrap();

        let config =
            AppConfig::from_lookup(lookup(&[("SCHEMA_PATH", path.to_str().unwrap())])).unwrap();
        assert!(config.load_schema().await.is_err());
    }
}
