use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::transport_error;
use super::types::LlmClient;
use super::StructuringError;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at an Ollama instance.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, StructuringError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn complete(&self, prompt: &str) -> Result<String, StructuringError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };
        debug!(model = %self.model, prompt_len = prompt.len(), "Calling Ollama");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StructuringError::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| StructuringError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_client_constructor() {
        let client = OllamaClient::new("http://localhost:11434", "llama3", 120).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.timeout_secs, 120);
        assert_eq!(client.model_name(), "llama3");
    }

    #[test]
    fn ollama_client_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3", 60).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn request_asks_for_json_without_streaming() {
        let body = serde_json::to_value(OllamaGenerateRequest {
            model: "llama3",
            prompt: "p",
            stream: false,
            format: "json",
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let client = OllamaClient::new("http://127.0.0.1:1", "llama3", 2).unwrap();
        let err = client.complete("hello").unwrap_err();
        assert!(matches!(
            err,
            StructuringError::Connection(_) | StructuringError::HttpClient(_)
        ));
    }
}
