pub mod assembler;
pub mod config;
pub mod error;
pub mod extractor;
pub mod food_db;
pub mod llm;
pub mod normalizer;
pub mod orchestrator;
pub mod portions;
pub mod prompts;
pub mod resolver;
pub mod store;
pub mod summary;
pub mod triggers;
pub mod types;

pub use assembler::{ClarificationChoice, ClarifyError, LogAssembler};
pub use config::{BodyWeightUnit, ConfigError, ForgeConfig, RetryPolicy};
pub use error::{IngestError, ItemError, ItemFailure};
pub use extractor::{EntityExtractor, ExtractError};
pub use food_db::{create_food_database, FoodDatabase, FoodDbError, FoodRecord};
pub use llm::{create_provider, LlmError, LlmProvider};
pub use normalizer::{NormalizeError, UnitNormalizer};
pub use orchestrator::Ingestor;
pub use resolver::FoodResolver;
pub use store::{CommitBatch, InMemoryLogStore, LogStore, StoreError, StoreState};
pub use summary::{daily_summary, DailySummary};
pub use triggers::looks_like_log;
pub use types::{
    CanonicalUnit, ClarificationReason, ClarificationRequest, ExtractedItem, IngestionResult,
    ItemKind, LogEntry, MealType, NormalizedQuantity, NutrientProfile, RawMessage, ResolvedFood,
};
