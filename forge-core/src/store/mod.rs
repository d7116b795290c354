//! Log persistence.
//!
//! The pipeline only talks to [`LogStore`]. Every mutation a store exposes is
//! all-or-nothing: a failed commit leaves no entry or clarification behind.

mod memory;

pub use memory::InMemoryLogStore;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ClarificationRequest, LogEntry};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything one ingestion call persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub entries: Vec<LogEntry>,
    pub clarifications: Vec<ClarificationRequest>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.clarifications.is_empty()
    }
}

/// Repository for log entries and pending clarifications.
#[async_trait]
pub trait LogStore: Send + Sync + fmt::Debug {
    /// Persist a batch atomically.
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError>;

    /// A user's entries with `from <= logged_at < to`, oldest first.
    async fn entries_between(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError>;

    /// The user's most recently logged entry.
    async fn latest_entry(&self, user: &str) -> Result<Option<LogEntry>, StoreError>;

    /// Remove one of the user's entries, returning it.
    async fn delete_entry(&self, user: &str, id: Uuid) -> Result<Option<LogEntry>, StoreError>;

    /// A pending clarification, if it exists and belongs to the user.
    async fn clarification(
        &self,
        user: &str,
        id: Uuid,
    ) -> Result<Option<ClarificationRequest>, StoreError>;

    /// A user's clarifications still open at `now`, oldest first.
    async fn pending_clarifications(
        &self,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClarificationRequest>, StoreError>;

    /// Remove a clarification and store the entry that resolves it, atomically.
    ///
    /// Returns `false` and stores nothing if the clarification no longer exists.
    async fn resolve_clarification(
        &self,
        request_id: Uuid,
        entry: LogEntry,
    ) -> Result<bool, StoreError>;

    /// Drop clarifications expired at `now`. Returns how many were dropped.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// How often the user logged each FDC id since `since`.
    async fn recent_foods(
        &self,
        user: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<u64, usize>, StoreError> {
        let entries = self
            .entries_between(user, since, DateTime::<Utc>::MAX_UTC)
            .await?;
        let mut counts = HashMap::new();
        for fdc_id in entries.iter().filter_map(|e| e.fdc_id) {
            *counts.entry(fdc_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Plain in-memory state shared by the store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub entries: Vec<LogEntry>,
    pub clarifications: Vec<ClarificationRequest>,
}

impl StoreState {
    pub fn apply(&mut self, batch: CommitBatch) {
        self.entries.extend(batch.entries);
        self.clarifications.extend(batch.clarifications);
    }

    pub fn entries_between(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<LogEntry> {
        let mut found: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| e.user == user && e.logged_at >= from && e.logged_at < to)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.logged_at, e.item_position));
        found
    }

    pub fn latest_entry(&self, user: &str) -> Option<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.user == user)
            .max_by_key(|e| (e.logged_at, e.created_at, e.item_position))
            .cloned()
    }

    pub fn delete_entry(&mut self, user: &str, id: Uuid) -> Option<LogEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id && e.user == user)?;
        Some(self.entries.remove(index))
    }

    pub fn clarification(&self, user: &str, id: Uuid) -> Option<ClarificationRequest> {
        self.clarifications
            .iter()
            .find(|c| c.id == id && c.user == user)
            .cloned()
    }

    pub fn pending_clarifications(
        &self,
        user: &str,
        now: DateTime<Utc>,
    ) -> Vec<ClarificationRequest> {
        let mut pending: Vec<ClarificationRequest> = self
            .clarifications
            .iter()
            .filter(|c| c.user == user && !c.is_expired(now))
            .cloned()
            .collect();
        pending.sort_by_key(|c| (c.created_at, c.item.position));
        pending
    }

    pub fn resolve_clarification(&mut self, request_id: Uuid, entry: LogEntry) -> bool {
        match self.clarifications.iter().position(|c| c.id == request_id) {
            Some(index) => {
                self.clarifications.remove(index);
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.clarifications.len();
        self.clarifications.retain(|c| !c.is_expired(now));
        before - self.clarifications.len()
    }
}
