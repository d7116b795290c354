//! JSON-file log store for the CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::store::{CommitBatch, LogStore, StoreError, StoreState};
use forge_core::types::{ClarificationRequest, LogEntry};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Keeps every entry and pending clarification in `data_dir/log.json`.
///
/// Each mutation is applied to a copy of the state, written to a temp file
/// and renamed over the old one; the in-memory state only changes once the
/// rename succeeded. A crash mid-write leaves the previous file intact.
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileLogStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join("log.json");

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `mutate` to a copy of the state, persist it, then swap it in.
    async fn update<T>(&self, mutate: impl FnOnce(&mut StoreState) -> T) -> Result<T, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn commit(&self, batch: CommitBatch) -> Result<(), StoreError> {
        self.update(|state| state.apply(batch)).await
    }

    async fn entries_between(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.state.lock().await.entries_between(user, from, to))
    }

    async fn latest_entry(&self, user: &str) -> Result<Option<LogEntry>, StoreError> {
        Ok(self.state.lock().await.latest_entry(user))
    }

    async fn delete_entry(&self, user: &str, id: Uuid) -> Result<Option<LogEntry>, StoreError> {
        self.update(|state| state.delete_entry(user, id)).await
    }

    async fn clarification(
        &self,
        user: &str,
        id: Uuid,
    ) -> Result<Option<ClarificationRequest>, StoreError> {
        Ok(self.state.lock().await.clarification(user, id))
    }

    async fn pending_clarifications(
        &self,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClarificationRequest>, StoreError> {
        Ok(self.state.lock().await.pending_clarifications(user, now))
    }

    async fn resolve_clarification(
        &self,
        request_id: Uuid,
        entry: LogEntry,
    ) -> Result<bool, StoreError> {
        self.update(|state| state.resolve_clarification(request_id, entry))
            .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.update(|state| state.purge_expired(now)).await
    }
}
