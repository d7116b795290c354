//! Food database abstraction.
//!
//! A food database answers free-text searches with records carrying nutrients
//! per 100 g. Scoring and ranking happen in the resolver, not here.

mod memory;
mod usda;

pub use memory::InMemoryFoodDatabase;
pub use usda::UsdaClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FoodDbConfig;
use crate::types::NutrientProfile;

#[derive(Error, Debug)]
pub enum FoodDbError {
    #[error("Food database request failed: {0}")]
    RequestFailed(String),

    #[error("Food database returned HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse food database response: {0}")]
    ParseError(String),

    #[error("Failed to load food list: {0}")]
    Load(String),
}

/// One record as returned by a food database search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    pub fdc_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub per_100g: NutrientProfile,
    /// Serving size in grams, when the database reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_grams: Option<f64>,
}

/// Trait for food databases, enabling mockability in tests.
#[async_trait]
pub trait FoodDatabase: Send + Sync + std::fmt::Debug {
    /// Search for foods matching free text. An empty result is not an error.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<FoodRecord>, FoodDbError>;

    /// Get the source name (e.g., "usda", "memory").
    fn source_name(&self) -> &'static str;
}

/// Build the configured food database: a local food list when one is set,
/// USDA FoodData Central otherwise.
pub fn create_food_database(config: &FoodDbConfig) -> Result<Arc<dyn FoodDatabase>, FoodDbError> {
    match &config.food_file {
        Some(path) => Ok(Arc::new(InMemoryFoodDatabase::from_path(path)?)),
        None => Ok(Arc::new(UsdaClient::new(
            config.api_key.clone(),
            config.base_url.clone(),
        )?)),
    }
}
