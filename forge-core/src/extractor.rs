//! Entity extraction: one chat message in, typed loggable items out.
//!
//! The language-understanding service is untrusted. Its reply is validated
//! against [`ExtractionResponse`] before anything downstream sees it.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::RetryPolicy;
use crate::llm::{CompletionRequest, LlmError, LlmProvider};
use crate::prompts::extract_items::{
    render_extract_items_prompt, EXTRACT_ITEMS_PROMPT_NAME, EXTRACT_ITEMS_SYSTEM_PROMPT,
};
use crate::types::{ExtractedItem, ItemKind, MealType, RawMessage};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extraction failed after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },
}

/// Why a single attempt failed. Internal; every variant is retried.
#[derive(Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("response did not match the item schema: {0}")]
    Schema(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Llm(e) => e.is_retryable(),
            AttemptError::Timeout(_) | AttemptError::Schema(_) => true,
        }
    }
}

/// The two reply shapes the prompt allows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionResponse {
    Items { items: Vec<RawItem> },
    Refusal {
        error: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawItem {
    kind: String,
    #[serde(default)]
    quantity: Option<QuantityField>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    meal_type: Option<String>,
}

/// Models sometimes answer `"quantity": 24` instead of `"24"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuantityField {
    Number(f64),
    Text(String),
}

impl QuantityField {
    fn into_text(self) -> String {
        match self {
            QuantityField::Number(n) => n.to_string(),
            QuantityField::Text(s) => s,
        }
    }
}

pub struct EntityExtractor {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl EntityExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            call_timeout,
        }
    }

    /// Split a message into loggable items.
    ///
    /// An empty list means the message had nothing to log. Provider errors,
    /// timeouts and schema violations are retried per the retry policy and
    /// then surface as [`ExtractError::UpstreamUnavailable`].
    pub async fn extract(&self, message: &RawMessage) -> Result<Vec<ExtractedItem>, ExtractError> {
        let request = CompletionRequest::new(render_extract_items_prompt(&message.body))
            .with_system(EXTRACT_ITEMS_SYSTEM_PROMPT)
            .with_max_tokens(500)
            .with_temperature(0.0);

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&request).await {
                Ok(items) => {
                    tracing::debug!(
                        prompt = EXTRACT_ITEMS_PROMPT_NAME,
                        attempt,
                        items = items.len(),
                        "Extraction succeeded"
                    );
                    return Ok(items);
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        prompt = EXTRACT_ITEMS_PROMPT_NAME,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Extraction attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(prompt = EXTRACT_ITEMS_PROMPT_NAME, attempt, error = %e, "Extraction failed");
                    return Err(ExtractError::UpstreamUnavailable {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<Vec<ExtractedItem>, AttemptError> {
        let text = tokio::time::timeout(self.call_timeout, self.provider.complete(request))
            .await
            .map_err(|_| AttemptError::Timeout(self.call_timeout))??;
        parse_extraction(&text)
    }
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(i) => &trimmed[i + 1..],
        None => return "",
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn parse_extraction(text: &str) -> Result<Vec<ExtractedItem>, AttemptError> {
    let response: ExtractionResponse = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| AttemptError::Schema(e.to_string()))?;

    let raw_items = match response {
        ExtractionResponse::Items { items } => items,
        ExtractionResponse::Refusal { error, reason } => {
            tracing::debug!(error = %error, reason = ?reason, "Model found nothing to log");
            return Ok(Vec::new());
        }
    };

    raw_items
        .into_iter()
        .enumerate()
        .map(|(position, raw)| convert_item(position, raw))
        .collect()
}

fn convert_item(position: usize, raw: RawItem) -> Result<ExtractedItem, AttemptError> {
    let kind: ItemKind = raw.kind.parse().map_err(AttemptError::Schema)?;

    let description = non_empty(raw.description).unwrap_or_else(|| match kind {
        ItemKind::Water => "water".to_string(),
        ItemKind::Weight => "body weight".to_string(),
        ItemKind::Food => String::new(),
    });
    if description.is_empty() {
        return Err(AttemptError::Schema(format!(
            "food item {position} has no description"
        )));
    }

    Ok(ExtractedItem {
        position,
        kind,
        raw_quantity: non_empty(raw.quantity.map(QuantityField::into_text)),
        raw_unit: non_empty(raw.unit),
        description,
        // An unrecognized meal type is not worth failing the message over
        meal_type: raw.meal_type.and_then(|m| m.parse::<MealType>().ok()),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}
