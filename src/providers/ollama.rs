//! Ollama API client
//!
//! Implements both collaborator seams Ollama can serve:
//! - `LanguageModel` via POST /api/generate (non-streaming, optional JSON schema)
//! - `Embedder` via POST /api/embeddings

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, SearchError};
use crate::providers::{CompletionRequest, Embedder, LanguageModel};

/// Default Ollama API endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Request timeout (30 seconds)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Ollama HTTP client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaClient {
    /// Create client with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL, DEFAULT_MODEL, DEFAULT_EMBEDDING_MODEL)
    }

    /// Create client with custom configuration
    pub fn with_config(base_url: &str, model: &str, embedding_model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/version", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get generation model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_generate_request(&self, request: CompletionRequest) -> GenerateRequest {
        let options = request
            .temperature
            .map(|t| serde_json::json!({ "temperature": t }));

        GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt,
            stream: false,
            format: request.schema,
            options,
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = self.build_generate_request(request);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::LlmApi(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::LlmApi(format!("HTTP {}: {}", status, error_text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SearchError::LlmApi(format!("Failed to parse response: {}", e)))?;

        Ok(parsed.response)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Embedding(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            return Err(SearchError::Embedding(format!(
                "HTTP {} from embeddings endpoint",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Embedding(format!("Failed to parse embedding: {}", e)))?;

        if parsed.embedding.is_empty() {
            return Err(SearchError::Embedding(format!(
                "Model {} returned an empty embedding",
                self.embedding_model
            )));
        }

        Ok(parsed.embedding)
    }
}

/// Ollama generate request
#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

/// Ollama generate response (non-streaming)
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::new().unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.embedding_model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(client.base_url(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            OllamaClient::with_config("http://localhost:11434/", "llama3.1:8b", "mxbai-embed-large")
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), "llama3.1:8b");
    }

    #[test]
    fn test_generate_request_serialization() {
        let client = OllamaClient::new().unwrap();
        let request = client.build_generate_request(
            CompletionRequest::new("grade this")
                .with_temperature(0.0)
                .with_schema(json!({"type": "object"})),
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], json!(false));
        assert_eq!(value["format"], json!({"type": "object"}));
        assert_eq!(value["options"]["temperature"], json!(0.0));
    }

    #[test]
    fn test_generate_request_omits_absent_options() {
        let client = OllamaClient::new().unwrap();
        let request = client.build_generate_request(CompletionRequest::new("plain"));
        let value = serde_json::to_value(&request).unwrap();

        assert!(value.get("format").is_none());
        assert!(value.get("options").is_none());
    }
}
