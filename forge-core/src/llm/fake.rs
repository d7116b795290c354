//! Fake LLM provider for testing.
//!
//! This provider returns deterministic responses based on prompt matching,
//! allowing tests to run without network access or API costs.

use super::{CompletionRequest, LlmError, LlmProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// A fake LLM provider for testing.
///
/// Responses are matched by checking if the user prompt contains a registered
/// substring, in registration order. If no match is found, returns the default
/// response or an error.
#[derive(Debug)]
pub struct FakeProvider {
    /// Ordered (prompt substring, response) pairs. First match wins.
    responses: RwLock<Vec<(String, String)>>,
    default_response: Option<String>,
    /// Number of leading calls that fail before responses are served.
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            responses: RwLock::new(Vec::new()),
            default_response: Some(r#"{"items": []}"#.to_string()),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProvider {
    /// Create a new FakeProvider with no registered responses.
    pub fn new() -> Self {
        Self {
            default_response: None,
            ..Self::default()
        }
    }

    /// Create a FakeProvider that returns a specific response for prompts containing a substring.
    pub fn with_response(prompt_contains: &str, response: &str) -> Self {
        let provider = Self::new();
        provider.add_response(prompt_contains, response);
        provider
    }

    /// Add a response for prompts containing a specific substring.
    pub fn add_response(&self, prompt_contains: &str, response: &str) {
        if let Ok(mut responses) = self.responses.write() {
            responses.push((prompt_contains.to_lowercase(), response.to_string()));
        }
    }

    /// Set the default response when no pattern matches.
    pub fn with_default_response(mut self, response: &str) -> Self {
        self.default_response = Some(response.to_string());
        self
    }

    /// Fail the next `count` calls with a request error.
    pub fn with_failures(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Total calls made, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create a FakeProvider with extraction responses for the standard sample messages.
    pub fn with_extraction_responses() -> Self {
        let provider = Self::new();

        provider.add_response(
            "24oz water and an apple",
            r#"{"items": [
                {"kind": "water", "quantity": "24", "unit": "oz", "description": "water"},
                {"kind": "food", "quantity": "an", "unit": null, "description": "apple", "meal_type": "snack"}
            ]}"#,
        );

        provider.add_response(
            "2 eggs and coffee",
            r#"{"items": [
                {"kind": "food", "quantity": "2", "unit": null, "description": "eggs", "meal_type": "breakfast"},
                {"kind": "food", "quantity": "1", "unit": "cup", "description": "coffee", "meal_type": "breakfast"}
            ]}"#,
        );

        provider.add_response(
            "weighed in",
            r#"{"items": [{"kind": "weight", "quantity": "185.5", "unit": "lbs", "description": "body weight"}]}"#,
        );

        provider.add_response(
            "good morning",
            r#"{"error": "Could not parse input", "reason": "not food or fitness related"}"#,
        );

        provider
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LlmError::RequestFailed(
                "FakeProvider: injected failure".to_string(),
            ));
        }

        let prompt_lower = request.prompt.to_lowercase();
        let matched = self.responses.read().ok().and_then(|responses| {
            responses
                .iter()
                .find(|(pattern, _)| prompt_lower.contains(pattern.as_str()))
                .map(|(_, response)| response.clone())
        });
        if let Some(response) = matched {
            return Ok(response);
        }

        match &self.default_response {
            Some(response) => Ok(response.clone()),
            None => Err(LlmError::RequestFailed(format!(
                "FakeProvider: No response configured for prompt (first 100 chars): {}",
                request.prompt.chars().take(100).collect::<String>()
            ))),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::new(prompt)
    }

    #[tokio::test]
    async fn test_fake_provider_matching() {
        let provider = FakeProvider::with_response("hello", "world");
        let result = provider.complete(&request("Say hello to the user")).await.unwrap();
        assert_eq!(result, "world");
    }

    #[tokio::test]
    async fn test_fake_provider_case_insensitive() {
        let provider = FakeProvider::with_response("HELLO", "world");
        let result = provider.complete(&request("hello there")).await.unwrap();
        assert_eq!(result, "world");
    }

    #[tokio::test]
    async fn test_fake_provider_no_match() {
        let provider = FakeProvider::new();
        let result = provider.complete(&request("random prompt")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fake_provider_default_response() {
        let provider = FakeProvider::new().with_default_response("default");
        let result = provider.complete(&request("random prompt")).await.unwrap();
        assert_eq!(result, "default");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let provider = FakeProvider::with_response("hi", "there").with_failures(1);
        assert!(provider.complete(&request("hi")).await.is_err());
        assert_eq!(provider.complete(&request("hi")).await.unwrap(), "there");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_first_registered_pattern_wins() {
        let provider = FakeProvider::new();
        provider.add_response("apple", "first");
        provider.add_response("an apple", "second");
        let result = provider.complete(&request("I ate an apple")).await.unwrap();
        assert_eq!(result, "first");
    }
}
