use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::transport_error;
use super::types::LlmClient;
use super::StructuringError;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Harm categories sent with threshold `BLOCK_NONE`.
const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Google Generative Language client (`models/{model}:generateContent`).
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(
        api_key: &str,
        model: &str,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, StructuringError> {
        Self::with_base_url(GEMINI_API_BASE, api_key, model, temperature, timeout_secs)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, StructuringError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            client,
            timeout_secs,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
struct SafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn build_request(prompt: &str, temperature: f32) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![RequestPart { text: prompt }],
        }],
        generation_config: GenerationConfig { temperature },
        safety_settings: SAFETY_CATEGORIES
            .iter()
            .map(|category| SafetySetting {
                category,
                threshold: "BLOCK_NONE",
            })
            .collect(),
    }
}

/// Text parts of the first candidate, concatenated.
fn candidate_text(response: GenerateContentResponse) -> Result<String, StructuringError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(StructuringError::EmptyResponse)?;
    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default())
}

impl LlmClient for GeminiClient {
    fn complete(&self, prompt: &str) -> Result<String, StructuringError> {
        let url = self.endpoint();
        debug!(model = %self.model, prompt_len = prompt.len(), "Calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(prompt, self.temperature))
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

        let parsed: GenerateContentResponse = response
            .json()
            .map_err(|e| StructuringError::ResponseParsing(e.to_string()))?;

        candidate_text(parsed)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_relaxes_every_safety_category() {
        let body = serde_json::to_value(build_request("hello", 0.1)).unwrap();
        let settings = body["safetySettings"].as_array().unwrap();
        assert_eq!(settings.len(), SAFETY_CATEGORIES.len());
        assert!(settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"text": "{\"a\":"}, {"text": " 1}"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(candidate_text(response).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn blocked_prompt_has_no_candidates() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "OTHER"}})).unwrap();
        assert!(matches!(candidate_text(response), Err(StructuringError::EmptyResponse)));
    }

    #[test]
    fn candidate_without_content_is_empty_text() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(candidate_text(response).unwrap(), "");
    }

    #[test]
    fn endpoint_uses_model_name() {
        let client =
            GeminiClient::with_base_url("http://localhost:9/v1beta/", "k", "gemini-pro", 0.1, 5)
                .unwrap();
        assert_eq!(
            client.endpoint(),
            "http://localhost:9/v1beta/models/gemini-pro:generateContent"
        );
        assert_eq!(client.model_name(), "gemini-pro");
    }
}
