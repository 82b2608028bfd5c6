use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{info, warn};

use super::parser::recover_payload;
use super::prompt::build_extraction_prompt;
use super::types::{ExtractionPayload, LlmClient};
use super::StructuringError;

/// Turns document text into a field payload through a generative model.
/// Never fails: an unreachable or unreadable model yields the fallback payload.
pub struct StructuredExtractor {
    client: Box<dyn LlmClient + Send + Sync>,
}

impl StructuredExtractor {
    pub fn new(client: Box<dyn LlmClient + Send + Sync>) -> Self {
        Self { client }
    }

    pub fn extract(&self, text: &str) -> ExtractionPayload {
        let prompt = build_extraction_prompt(text);
        let start = Instant::now();

        match self.client.complete(&prompt) {
            Ok(raw) => {
                let payload = recover_payload(&raw);
                info!(
                    model = self.client.model_name(),
                    fields = payload.as_map().len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Structured extraction complete"
                );
                payload
            }
            Err(e) => {
                warn!(
                    model = self.client.model_name(),
                    error = %e,
                    "Model call failed, using fallback payload"
                );
                ExtractionPayload::fallback()
            }
        }
    }
}

/// Map a reqwest send error to the structuring taxonomy.
pub(crate) fn transport_error(e: reqwest::Error, endpoint: &str, timeout_secs: u64) -> StructuringError {
    if e.is_timeout() {
        StructuringError::Timeout(timeout_secs)
    } else if e.is_connect() {
        StructuringError::Connection(endpoint.to_string())
    } else {
        StructuringError::HttpClient(e.to_string())
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock LLM client for testing: returns a configured answer or error.
/// Counts `complete` calls.
pub struct MockLlmClient {
    response: Option<String>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A client whose every call fails like an unreachable service.
    pub fn failing() -> Self {
        Self {
            response: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn complete(&self, _prompt: &str) -> Result<String, StructuringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .ok_or_else(|| StructuringError::Connection("mock://unreachable".into()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn extract_parses_model_answer() {
        let extractor = StructuredExtractor::new(Box::new(MockLlmClient::new(
            r#"{"document_type": "receipt", "confidence_score": 0.7, "amount_ttc": 12.5}"#,
        )));
        let payload = extractor.extract("Ticket de caisse");
        assert_eq!(payload.reported_type(), Some("receipt"));
        assert_eq!(payload.filled_field_count(), 1);
    }

    #[test]
    fn failing_model_yields_fallback() {
        let mock = Arc::new(MockLlmClient::failing());
        let extractor = StructuredExtractor::new(Box::new(Arc::clone(&mock)));
        assert_eq!(extractor.extract("anything"), ExtractionPayload::fallback());
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn prose_answer_is_recovered() {
        let extractor = StructuredExtractor::new(Box::new(MockLlmClient::new(
            "Sure! {\"supplier\": \"ACME\"} Hope this helps.",
        )));
        let payload = extractor.extract("ACME");
        assert_eq!(payload.get("supplier").and_then(|v| v.as_str()), Some("ACME"));
    }
}
