use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::ClarifyError;
use crate::extractor::ExtractError;
use crate::store::StoreError;
use crate::types::{ExtractedItem, ItemKind};

/// Failure of a whole ingestion or clarification call.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Extraction failed after retry; nothing in the message was processed.
    #[error("Language service unavailable: {0}")]
    UpstreamUnavailable(#[from] ExtractError),

    /// Nothing was committed. Safe to retry.
    #[error("Failed to persist log entries: {0}")]
    PersistenceFailure(#[source] StoreError),

    #[error(transparent)]
    Clarify(#[from] ClarifyError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::PersistenceFailure(_))
    }
}

/// Why a single item could be neither logged nor clarified.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemFailure {
    #[error("'{unit}' cannot measure {kind}")]
    IncompatibleUnit { unit: String, kind: ItemKind },

    #[error("Item processing failed: {message}")]
    WorkerFailed { message: String },
}

/// A per-item failure reported alongside the successful items of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: ExtractedItem,
    pub failure: ItemFailure,
}
