//! Food resolution: free-text food mention to ranked nutritional candidates.
//!
//! Records are scored lexically against the description. A record's name is
//! read the way USDA writes them: a head segment ("Apples"), then
//! comma-separated refinements ("raw", "with skin"). Refinements that only
//! describe preparation or accompaniments do not count against a match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::food_db::{FoodDatabase, FoodRecord};
use crate::portions::find_portion;
use crate::types::ResolvedFood;

const WEIGHT_COVERAGE: f64 = 0.40;
const WEIGHT_HEAD_PRECISION: f64 = 0.15;
const WEIGHT_ALL_PRECISION: f64 = 0.35;
const WEIGHT_HEAD_NOUN: f64 = 0.10;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "with", "without", "in", "on", "some", "my", "for", "to",
];

/// Preparation and processing words that do not change what the food is.
const DESCRIPTORS: &[&str] = &[
    "raw", "fresh", "whole", "cooked", "uncooked", "prepared", "plain", "regular", "canned",
    "bottled", "frozen", "unprepared", "unsweetened", "enriched", "unenriched", "ns", "nfs",
    "all", "commercial", "unheated", "drained", "solid", "liquid", "variety", "type",
];

/// Segments starting with these words qualify the food rather than name it.
const QUALIFIER_LEADS: &[&str] = &[
    "with", "without", "from", "in", "no", "not", "includes", "made",
];

/// Maps food descriptions to scored candidates from a [`FoodDatabase`].
#[derive(Debug)]
pub struct FoodResolver {
    db: Arc<dyn FoodDatabase>,
    search_limit: usize,
    min_similarity: f64,
    call_timeout: Duration,
}

impl FoodResolver {
    pub fn new(
        db: Arc<dyn FoodDatabase>,
        search_limit: usize,
        min_similarity: f64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            db,
            search_limit,
            min_similarity,
            call_timeout,
        }
    }

    /// Resolve a single description without caching or usage history.
    pub async fn resolve(&self, description: &str) -> Vec<ResolvedFood> {
        let mut candidates = self.search_and_score(description).await;
        rank(&mut candidates, &HashMap::new());
        candidates
    }

    /// Start a per-ingestion session. `recent` maps FDC ids to how often the
    /// user logged them recently, for breaking score ties.
    pub fn session(self: &Arc<Self>, recent: HashMap<u64, usize>) -> ResolutionSession {
        ResolutionSession {
            resolver: Arc::clone(self),
            cache: DashMap::new(),
            recent,
        }
    }

    /// Search the database and score every record. Failures degrade to no candidates.
    async fn search_and_score(&self, description: &str) -> Vec<ResolvedFood> {
        let query = tokenize(description);
        if query.is_empty() {
            return Vec::new();
        }

        let search = self.db.search(description.trim(), self.search_limit);
        let records = match tokio::time::timeout(self.call_timeout, search).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                tracing::warn!(
                    source = self.db.source_name(),
                    description = description,
                    error = %e,
                    "Food search failed, treating as no candidates"
                );
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    source = self.db.source_name(),
                    description = description,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Food search timed out, treating as no candidates"
                );
                return Vec::new();
            }
        };

        let candidates: Vec<ResolvedFood> = records
            .into_iter()
            .filter_map(|record| {
                let confidence = score(&query, &record.name);
                (confidence >= self.min_similarity).then(|| to_resolved(record, confidence))
            })
            .collect();

        tracing::debug!(
            description = description,
            candidates = candidates.len(),
            "Scored food candidates"
        );
        candidates
    }
}

/// Resolution state scoped to one ingestion call.
///
/// Concurrent lookups of the same normalized description share one database
/// search.
#[derive(Debug)]
pub struct ResolutionSession {
    resolver: Arc<FoodResolver>,
    cache: DashMap<String, Arc<OnceCell<Vec<ResolvedFood>>>>,
    recent: HashMap<u64, usize>,
}

impl ResolutionSession {
    /// Ranked candidates, most confident first. Empty when nothing is similar enough.
    pub async fn resolve(&self, description: &str) -> Vec<ResolvedFood> {
        let key = tokenize(description).join(" ");
        let cell = self.cache.entry(key).or_default().clone();

        let mut candidates = cell
            .get_or_init(|| self.resolver.search_and_score(description))
            .await
            .clone();
        rank(&mut candidates, &self.recent);
        candidates
    }

    /// Distinct descriptions looked up so far.
    pub fn lookups(&self) -> usize {
        self.cache.len()
    }
}

fn to_resolved(record: FoodRecord, confidence: f64) -> ResolvedFood {
    let portion = find_portion(&record.name);
    ResolvedFood {
        fdc_id: record.fdc_id,
        portion_grams: record
            .serving_grams
            .or_else(|| portion.and_then(|p| p.portion_grams)),
        grams_per_ml: portion.and_then(|p| p.grams_per_ml),
        name: record.name,
        brand: record.brand,
        per_100g: record.per_100g,
        confidence,
    }
}

/// Sort by confidence, then recent usage, then database order.
fn rank(candidates: &mut [ResolvedFood], recent: &HashMap<u64, usize>) {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| {
                let uses = |c: &ResolvedFood| recent.get(&c.fdc_id).copied().unwrap_or(0);
                uses(b).cmp(&uses(a))
            })
    });
}

/// Lexical similarity of a food name to query tokens, in [0, 1].
pub(crate) fn score(query: &[String], name: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let cleaned = strip_parentheticals(name);
    let mut segments = cleaned.split(',');
    let head: Vec<String> = tokenize(segments.next().unwrap_or_default());

    let mut all_tokens: HashSet<String> = head.iter().cloned().collect();
    let mut content: HashSet<String> = head.iter().cloned().collect();
    for segment in segments {
        let words = tokenize(segment);
        all_tokens.extend(words.iter().cloned());
        let lead = segment.split_whitespace().next().unwrap_or_default().to_lowercase();
        if !QUALIFIER_LEADS.contains(&lead.as_str()) {
            content.extend(words);
        }
    }

    let query_set: HashSet<&String> = query.iter().collect();
    let coverage = query_set.iter().filter(|q| all_tokens.contains(**q)).count() as f64
        / query_set.len() as f64;

    let head_unique: HashSet<&String> = head.iter().collect();
    let head_precision = precision(head_unique.into_iter(), &query_set);
    let all_precision = precision(content.iter(), &query_set);

    let head_noun = match query.last() {
        Some(noun) if head.contains(noun) => 1.0,
        _ => 0.0,
    };

    let raw = WEIGHT_COVERAGE * coverage
        + WEIGHT_HEAD_PRECISION * head_precision
        + WEIGHT_ALL_PRECISION * all_precision
        + WEIGHT_HEAD_NOUN * head_noun;
    (raw * 1000.0).round() / 1000.0
}

/// Share of the non-descriptor tokens that the query mentions.
fn precision<'a>(tokens: impl Iterator<Item = &'a String>, query: &HashSet<&String>) -> f64 {
    let meaningful: Vec<&String> = tokens.filter(|t| !is_descriptor(t)).collect();
    if meaningful.is_empty() {
        return 0.0;
    }
    meaningful.iter().filter(|t| query.contains(**t)).count() as f64 / meaningful.len() as f64
}

fn is_descriptor(token: &str) -> bool {
    DESCRIPTORS.contains(&token)
}

fn strip_parentheticals(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Lowercased, stopword-free, singularized words.
pub(crate) fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .map(|w| singularize(&w))
        .collect()
}

/// Fold common English plurals: "eggs" -> "egg", "berries" -> "berry".
fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() >= 2 {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = word.strip_suffix("oes") {
        if stem.len() >= 2 {
            return format!("{stem}o");
        }
    }
    for suffix in ["ches", "shes", "sses", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if word.len() > 3 => stem.to_string(),
        _ => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food_db::InMemoryFoodDatabase;
    use crate::types::NutrientProfile;

    fn q(s: &str) -> Vec<String> {
        tokenize(s)
    }

    fn record(fdc_id: u64, name: &str) -> FoodRecord {
        FoodRecord {
            fdc_id,
            name: name.to_string(),
            brand: None,
            per_100g: NutrientProfile::default(),
            serving_grams: None,
        }
    }

    fn resolver(db: InMemoryFoodDatabase) -> Arc<FoodResolver> {
        Arc::new(FoodResolver::new(Arc::new(db), 10, 0.3, Duration::from_secs(1)))
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("eggs"), "egg");
        assert_eq!(singularize("berries"), "berry");
        assert_eq!(singularize("tomatoes"), "tomato");
        assert_eq!(singularize("peaches"), "peach");
        assert_eq!(singularize("hummus"), "hummus");
        assert_eq!(singularize("glass"), "glass");
        assert_eq!(singularize("oats"), "oat");
        assert_eq!(singularize("gas"), "gas");
    }

    #[test]
    fn test_tokenize_drops_stopwords() {
        assert_eq!(tokenize("a bowl of the Oats"), vec!["bowl", "oat"]);
    }

    #[test]
    fn test_scores() {
        assert_eq!(score(&q("apple"), "Apples, raw, with skin"), 1.0);
        assert_eq!(score(&q("apple"), "Apple juice, canned or bottled, unsweetened"), 0.75);
        assert_eq!(score(&q("eggs"), "Egg, whole, raw, fresh"), 1.0);
        assert_eq!(score(&q("eggs"), "Egg, white, raw, fresh"), 0.825);
        assert_eq!(
            score(&q("apple"), "Apples, raw, with skin (Includes foods for USDA's Food Distribution Program)"),
            1.0
        );
        assert_eq!(score(&q("coffee"), "Apples, raw"), 0.0);
    }

    #[test]
    fn test_multiword_query() {
        let peanut_butter = score(&q("peanut butter"), "Peanut butter, smooth style, without salt");
        let butter = score(&q("peanut butter"), "Butter, salted");
        assert!(peanut_butter > butter, "{peanut_butter} vs {butter}");
    }

    #[tokio::test]
    async fn test_resolve_ranks_and_filters() {
        let db = InMemoryFoodDatabase::new(vec![
            record(3, "Apple juice, canned or bottled, unsweetened"),
            record(1, "Apples, raw, with skin"),
            record(9, "Pie, apple, commercially prepared, enriched flour, with many other words"),
        ]);
        let found = resolver(db).resolve("an apple").await;
        assert_eq!(found[0].fdc_id, 1);
        assert_eq!(found[0].portion_grams, Some(182.0));
        assert!(found.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(found.iter().all(|c| c.confidence >= 0.3));
    }

    #[tokio::test]
    async fn test_recent_usage_breaks_ties() {
        let db = InMemoryFoodDatabase::new(vec![
            record(10, "Milk, whole"),
            record(20, "Milk, lowfat"),
            record(30, "Milk, nonfat"),
        ]);
        let resolver = resolver(db);

        let plain = resolver.resolve("milk").await;
        assert_eq!(plain[1].confidence, plain[2].confidence);
        assert_eq!(plain[1].fdc_id, 20);

        let session = resolver.session(HashMap::from([(30, 4)]));
        let ranked = session.resolve("milk").await;
        assert_eq!(ranked[0].fdc_id, 10);
        assert_eq!(ranked[1].fdc_id, 30);
    }

    #[tokio::test]
    async fn test_session_searches_once_per_description() {
        let db = Arc::new(InMemoryFoodDatabase::new(vec![record(1, "Egg, whole, raw, fresh")]));
        let resolver = Arc::new(FoodResolver::new(db.clone(), 10, 0.3, Duration::from_secs(1)));
        let session = Arc::new(resolver.session(HashMap::new()));

        let mut tasks = tokio::task::JoinSet::new();
        for description in ["eggs", "egg", "Eggs", "eggs"] {
            let session = Arc::clone(&session);
            tasks.spawn(async move { session.resolve(description).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap()[0].fdc_id, 1);
        }

        assert_eq!(db.search_count(), 1);
        assert_eq!(session.lookups(), 1);
    }

    #[tokio::test]
    async fn test_database_failure_is_no_candidates() {
        let found = resolver(InMemoryFoodDatabase::failing()).resolve("apple").await;
        assert!(found.is_empty());
    }
}
