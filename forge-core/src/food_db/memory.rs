//! In-memory food database loaded from a JSON food list.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use super::{FoodDatabase, FoodDbError, FoodRecord};

#[derive(Deserialize)]
struct FoodListFile {
    foods: Vec<FoodRecord>,
}

/// Returns every record sharing at least one word with the query, in file order.
///
/// Stands in for USDA in tests and offline use. Ranking is left to the resolver.
#[derive(Debug, Default)]
pub struct InMemoryFoodDatabase {
    records: Vec<FoodRecord>,
    searches: AtomicUsize,
    fail: bool,
}

impl InMemoryFoodDatabase {
    pub fn new(records: Vec<FoodRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    /// Parse a `{"foods": [...]}` document.
    pub fn from_json(json: &str) -> Result<Self, FoodDbError> {
        let file: FoodListFile =
            serde_json::from_str(json).map_err(|e| FoodDbError::Load(e.to_string()))?;
        Ok(Self::new(file.foods))
    }

    pub fn from_path(path: &Path) -> Result<Self, FoodDbError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| FoodDbError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Make every search fail, to exercise degraded paths.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Number of searches served so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

fn words(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
}

/// Crude stemming so "eggs" finds "Egg, whole".
fn stem(word: &str) -> &str {
    word.strip_suffix("es")
        .filter(|w| w.ends_with(['h', 'o', 'x']))
        .or_else(|| word.strip_suffix('s').filter(|w| w.len() > 2))
        .unwrap_or(word)
}

#[async_trait]
impl FoodDatabase for InMemoryFoodDatabase {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<FoodRecord>, FoodDbError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FoodDbError::RequestFailed("in-memory database set to fail".to_string()));
        }

        let query_words: Vec<String> = words(query).map(|w| stem(&w).to_string()).collect();
        let matches = self
            .records
            .iter()
            .filter(|record| {
                words(&record.name).any(|w| query_words.iter().any(|q| q == stem(&w)))
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(matches)
    }

    fn source_name(&self) -> &'static str {
        "memory"
    }
}
