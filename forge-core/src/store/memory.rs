//! In-memory log store for tests and embedding.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CommitBatch, LogStore, StoreError, StoreState};
use crate::types::{ClarificationRequest, LogEntry};

#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    state: RwLock<StoreState>,
    /// When set, every call fails with `Unavailable`.
    unavailable: AtomicBool,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.apply(batch);
        Ok(())
    }

    async fn entries_between(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.entries_between(user, from, to))
    }

    async fn latest_entry(&self, user: &str) -> Result<Option<LogEntry>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.latest_entry(user))
    }

    async fn delete_entry(&self, user: &str, id: Uuid) -> Result<Option<LogEntry>, StoreError> {
        self.check()?;
        Ok(self.state.write().await.delete_entry(user, id))
    }

    async fn clarification(
        &self,
        user: &str,
        id: Uuid,
    ) -> Result<Option<ClarificationRequest>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.clarification(user, id))
    }

    async fn pending_clarifications(
        &self,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClarificationRequest>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.pending_clarifications(user, now))
    }

    async fn resolve_clarification(
        &self,
        request_id: Uuid,
        entry: LogEntry,
    ) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self
            .state
            .write()
            .await
            .resolve_clarification(request_id, entry))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self.state.write().await.purge_expired(now))
    }
}
