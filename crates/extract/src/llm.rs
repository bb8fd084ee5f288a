use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The external model: prompt in, unstructured text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434", "llama3")
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

/// Deterministic stand-in for a model, used by tests and dry runs.
///
/// A prompt containing a registered needle gets that needle's response;
/// anything else gets the fallback.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    fallback: Option<Reply>,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(response.into())));
        self
    }

    pub fn fail_on(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(Reply::Text(response.into()));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .or(self.fallback.as_ref());

        match reply {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail(message)) => anyhow::bail!("{}", message),
            None => anyhow::bail!("no scripted response for prompt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rules_and_fallback() {
        let llm = ScriptedLlm::new()
            .respond("alpha", "A")
            .fail_on("boom", "provider down")
            .with_fallback("{}");

        assert_eq!(llm.complete("... alpha ...").await.unwrap(), "A");
        assert_eq!(llm.complete("other").await.unwrap(), "{}");
        let err = llm.complete("boom").await.unwrap_err();
        assert_eq!(err.to_string(), "provider down");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.prompts()[1], "other");
    }

    #[tokio::test]
    async fn test_unscripted_prompt_fails() {
        let llm = ScriptedLlm::new();
        assert!(llm.complete("anything").await.is_err());
    }

    #[tokio::test]
    async fn test_shared_client_counts_once() {
        let llm = Arc::new(ScriptedLlm::new().with_fallback("ok"));
        let shared: Arc<dyn LlmClient> = llm.clone();
        shared.complete("x").await.unwrap();
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn test_default_ollama_client() {
        assert_eq!(OllamaClient::default().model(), "llama3");
    }
}
