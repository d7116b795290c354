//! Ingestion orchestrator: one chat message in, persisted entries and
//! clarification requests out.
//!
//! Each call moves through `Received -> Extracting -> Processing -> Assembled`.
//! Items are normalized and resolved concurrently; one item failing never
//! affects its siblings. Nothing is written until every item is assembled,
//! and then everything is written in a single commit.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::{JoinError, JoinSet};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::assembler::{Assembled, ClarificationChoice, ClarifyError, LogAssembler};
use crate::config::ForgeConfig;
use crate::error::{IngestError, ItemError, ItemFailure};
use crate::extractor::EntityExtractor;
use crate::food_db::FoodDatabase;
use crate::llm::LlmProvider;
use crate::normalizer::{NormalizeError, UnitNormalizer};
use crate::resolver::{FoodResolver, ResolutionSession};
use crate::store::{CommitBatch, LogStore};
use crate::types::{
    ExtractedItem, IngestionResult, ItemKind, LogEntry, NormalizedQuantity, RawMessage,
    ResolvedFood,
};

/// Stage of one ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    Extracting,
    Processing,
    Assembled,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IngestStage::Received => "received",
            IngestStage::Extracting => "extracting",
            IngestStage::Processing => "processing",
            IngestStage::Assembled => "assembled",
        })
    }
}

fn enter(stage: IngestStage) {
    tracing::debug!(stage = %stage, "Ingestion stage");
}

/// Output of one item task, before assembly.
struct ProcessedItem {
    item: ExtractedItem,
    quantity: Result<NormalizedQuantity, NormalizeError>,
    candidates: Vec<ResolvedFood>,
}

pub struct Ingestor {
    extractor: EntityExtractor,
    normalizer: UnitNormalizer,
    resolver: Arc<FoodResolver>,
    assembler: LogAssembler,
    store: Arc<dyn LogStore>,
    max_concurrency: usize,
    recent_window: chrono::Duration,
}

impl Ingestor {
    pub fn new(
        config: &ForgeConfig,
        provider: Arc<dyn LlmProvider>,
        food_db: Arc<dyn FoodDatabase>,
        store: Arc<dyn LogStore>,
    ) -> Self {
        let ingest = &config.ingest;
        Self {
            extractor: EntityExtractor::new(provider, config.retry, ingest.call_timeout),
            normalizer: UnitNormalizer::new(ingest.weight_unit),
            resolver: Arc::new(FoodResolver::new(
                food_db,
                config.food_db.page_size,
                ingest.min_similarity,
                ingest.call_timeout,
            )),
            assembler: LogAssembler::new(ingest),
            store,
            max_concurrency: ingest.max_concurrency.max(1),
            recent_window: ingest.recent_window,
        }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Ingest one message.
    ///
    /// Fails as a whole only when extraction fails after retry
    /// ([`IngestError::UpstreamUnavailable`]) or the final commit fails
    /// ([`IngestError::PersistenceFailure`], nothing written). Per-item
    /// problems are reported inside the result.
    pub async fn ingest(&self, message: &RawMessage) -> Result<IngestionResult, IngestError> {
        let span = info_span!("ingest", message_id = %message.id, user = %message.sender);
        self.run(message).instrument(span).await
    }

    async fn run(&self, message: &RawMessage) -> Result<IngestionResult, IngestError> {
        enter(IngestStage::Received);
        let mut result = IngestionResult::new(message.id);

        enter(IngestStage::Extracting);
        let items = self
            .extractor
            .extract(message)
            .instrument(info_span!("extract"))
            .await?;
        if items.is_empty() {
            tracing::info!("No loggable items found");
            return Ok(result);
        }

        enter(IngestStage::Processing);
        let session = Arc::new(self.resolver.session(self.recent_foods(message).await));
        let mut processed = self.process_items(&items, session).await;
        processed.sort_by_key(|p| p.item.position);

        let done: HashSet<usize> = processed.iter().map(|p| p.item.position).collect();
        for item in items.iter().filter(|i| !done.contains(&i.position)) {
            result.errors.push(ItemError {
                item: item.clone(),
                failure: ItemFailure::WorkerFailed {
                    message: "item task did not complete".to_string(),
                },
            });
        }

        let now = Utc::now();
        for p in processed {
            match self
                .assembler
                .assemble(message, p.item, p.quantity, p.candidates, now)
            {
                Assembled::Entry(entry) => result.entries.push(entry),
                Assembled::Clarification(request) => {
                    tracing::debug!(
                        position = request.item.position,
                        reason = ?request.reason,
                        "Item needs clarification"
                    );
                    result.clarifications.push(request);
                }
                Assembled::Failed(error) => {
                    tracing::debug!(position = error.item.position, failure = %error.failure, "Item errored");
                    result.errors.push(error);
                }
            }
        }
        result.errors.sort_by_key(|e| e.item.position);
        enter(IngestStage::Assembled);

        // Unanswerable requests are reported but not kept
        let batch = CommitBatch {
            entries: result.entries.clone(),
            clarifications: result
                .clarifications
                .iter()
                .filter(|c| c.is_answerable())
                .cloned()
                .collect(),
        };
        if !batch.is_empty() {
            self.store
                .commit(batch)
                .instrument(info_span!("commit"))
                .await
                .map_err(IngestError::PersistenceFailure)?;
        }

        tracing::info!(
            entries = result.entries.len(),
            clarifications = result.clarifications.len(),
            errors = result.errors.len(),
            "Message ingested"
        );
        Ok(result)
    }

    /// Usage counts for tie-breaking. Best effort: a store error only loses the tie-break.
    async fn recent_foods(&self, message: &RawMessage) -> HashMap<u64, usize> {
        let since = message
            .received_at
            .checked_sub_signed(self.recent_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store.recent_foods(&message.sender, since).await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load recent foods");
                HashMap::new()
            }
        }
    }

    /// Normalize and resolve every item on a bounded worker pool.
    ///
    /// Dropping the returned future aborts in-flight tasks.
    async fn process_items(
        &self,
        items: &[ExtractedItem],
        session: Arc<ResolutionSession>,
    ) -> Vec<ProcessedItem> {
        let mut tasks = JoinSet::new();
        let mut processed = Vec::with_capacity(items.len());

        for item in items.iter().cloned() {
            let span = info_span!("item", position = item.position, kind = %item.kind);
            tasks.spawn(process_item(self.normalizer, Arc::clone(&session), item).instrument(span));

            // Limit concurrency
            if tasks.len() >= self.max_concurrency {
                if let Some(joined) = tasks.join_next().await {
                    record_joined(joined, &mut processed);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            record_joined(joined, &mut processed);
        }
        processed
    }

    /// Answer a pending clarification and log the resulting entry.
    pub async fn clarify(
        &self,
        user: &str,
        request_id: Uuid,
        choice: ClarificationChoice,
    ) -> Result<LogEntry, IngestError> {
        let span = info_span!("clarify", request_id = %request_id, user = %user);
        self.resolve_pending(user, request_id, choice)
            .instrument(span)
            .await
    }

    async fn resolve_pending(
        &self,
        user: &str,
        request_id: Uuid,
        choice: ClarificationChoice,
    ) -> Result<LogEntry, IngestError> {
        let request = self
            .store
            .clarification(user, request_id)
            .await
            .map_err(IngestError::PersistenceFailure)?
            .ok_or(ClarifyError::NotFound(request_id))?;

        let entry = self
            .assembler
            .resolve_clarification(&request, choice, Utc::now())?;

        let resolved = self
            .store
            .resolve_clarification(request_id, entry.clone())
            .await
            .map_err(IngestError::PersistenceFailure)?;
        if !resolved {
            return Err(ClarifyError::NotFound(request_id).into());
        }

        tracing::info!(fdc_id = ?entry.fdc_id, "Clarification resolved");
        Ok(entry)
    }

    /// Discard clarifications that expired at `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, IngestError> {
        let purged = self
            .store
            .purge_expired(now)
            .await
            .map_err(IngestError::PersistenceFailure)?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired clarifications");
        }
        Ok(purged)
    }
}

async fn process_item(
    normalizer: UnitNormalizer,
    session: Arc<ResolutionSession>,
    item: ExtractedItem,
) -> ProcessedItem {
    let quantity = normalizer.normalize(
        item.raw_quantity.as_deref(),
        item.raw_unit.as_deref(),
        item.kind,
    );
    let candidates = match item.kind {
        ItemKind::Food => session.resolve(&item.description).await,
        ItemKind::Water | ItemKind::Weight => Vec::new(),
    };
    ProcessedItem {
        item,
        quantity,
        candidates,
    }
}

fn record_joined(joined: Result<ProcessedItem, JoinError>, processed: &mut Vec<ProcessedItem>) {
    match joined {
        Ok(item) => processed.push(item),
        Err(e) => tracing::error!(error = %e, "Item task failed"),
    }
}
