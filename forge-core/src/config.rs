//! Process-wide configuration, loaded once at startup from environment variables
//! and passed explicitly to each component.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

/// Default Claude model for extraction.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";

/// Default USDA FoodData Central API base URL.
pub const DEFAULT_USDA_BASE_URL: &str = "https://api.nal.usda.gov/fdc/v1";

/// Day boundaries for summaries are computed in this zone unless overridden.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Upper bound for `FORGE_CLARIFY_TTL_HOURS` (one year).
pub const MAX_CLARIFY_TTL_HOURS: i64 = 8760;

/// Upper bound for `FORGE_RECENT_DAYS` (ten years).
pub const MAX_RECENT_DAYS: i64 = 3650;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Fake,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(ProviderKind::Claude),
            "fake" => Ok(ProviderKind::Fake),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Unit assumed for a body weight logged as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyWeightUnit {
    Pounds,
    Kilograms,
}

impl BodyWeightUnit {
    pub fn grams_per_unit(&self) -> f64 {
        match self {
            BodyWeightUnit::Pounds => 453.592,
            BodyWeightUnit::Kilograms => 1000.0,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BodyWeightUnit::Pounds => "lbs",
            BodyWeightUnit::Kilograms => "kg",
        }
    }
}

impl FromStr for BodyWeightUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lb" | "lbs" => Ok(BodyWeightUnit::Pounds),
            "kg" => Ok(BodyWeightUnit::Kilograms),
            other => Err(format!("unknown weight unit: {other}")),
        }
    }
}

/// Explicit retry policy for the entity extractor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 = first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor.max(0.0))
    }
}

impl Default for RetryPolicy {
    /// One retry after 250ms.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// When set, responses are cached on disk under this directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Claude,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FoodDbConfig {
    /// Without a key the USDA client returns no results.
    pub api_key: Option<String>,
    pub base_url: String,
    pub page_size: usize,
    /// Use a local JSON food list instead of USDA.
    pub food_file: Option<PathBuf>,
}

impl Default for FoodDbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_USDA_BASE_URL.to_string(),
            page_size: 10,
            food_file: None,
        }
    }
}

/// Tunables for matching and the ingestion worker pool.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum confidence for the top candidate to be accepted without asking.
    pub acceptance_threshold: f64,
    /// Required lead of the top candidate over the runner-up.
    pub acceptance_margin: f64,
    /// Candidates below this lexical similarity are dropped.
    pub min_similarity: f64,
    /// Candidates offered in a clarification request.
    pub clarification_candidates: usize,
    pub max_concurrency: usize,
    /// Timeout for each external call.
    pub call_timeout: Duration,
    pub clarification_ttl: chrono::Duration,
    pub weight_unit: BodyWeightUnit,
    /// How far back logged foods count toward the recency tie-break.
    pub recent_window: chrono::Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.75,
            acceptance_margin: 0.15,
            min_similarity: 0.3,
            clarification_candidates: 3,
            max_concurrency: 8,
            call_timeout: Duration::from_secs(5),
            clarification_ttl: chrono::Duration::hours(24),
            weight_unit: BodyWeightUnit::Pounds,
            recent_window: chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub llm: LlmConfig,
    pub food_db: FoodDbConfig,
    pub ingest: IngestConfig,
    pub retry: RetryPolicy,
    pub timezone: Tz,
    /// Where the CLI keeps its log store.
    pub data_dir: PathBuf,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            food_db: FoodDbConfig::default(),
            ingest: IngestConfig::default(),
            retry: RetryPolicy::default(),
            timezone: chrono_tz::America::New_York,
            data_dir: Self::default_data_dir(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (defaults in parentheses):
    /// - `FORGE_LLM_PROVIDER`: "claude" or "fake" ("claude")
    /// - `ANTHROPIC_API_KEY`: required when the provider is "claude"
    /// - `FORGE_LLM_MODEL`, `FORGE_LLM_BASE_URL`, `FORGE_LLM_CACHE_DIR`
    /// - `USDA_API_KEY`, `FORGE_USDA_BASE_URL`, `FORGE_USDA_PAGE_SIZE` (10)
    /// - `FORGE_FOOD_FILE`: local JSON food list used instead of USDA
    /// - `FORGE_ACCEPT_THRESHOLD` (0.75), `FORGE_ACCEPT_MARGIN` (0.15),
    ///   `FORGE_MIN_SIMILARITY` (0.3), `FORGE_CLARIFY_CANDIDATES` (3)
    /// - `FORGE_MAX_CONCURRENCY` (8), `FORGE_CALL_TIMEOUT_MS` (5000)
    /// - `FORGE_CLARIFY_TTL_HOURS` (24), `FORGE_RECENT_DAYS` (30)
    /// - `FORGE_RETRY_ATTEMPTS` (2), `FORGE_RETRY_BACKOFF_MS` (250)
    /// - `FORGE_TIMEZONE` ("America/New_York"), `FORGE_WEIGHT_UNIT` ("lb")
    /// - `FORGE_DATA_DIR` ("~/.forge")
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        let provider = vars.parse("FORGE_LLM_PROVIDER", defaults.llm.provider)?;
        let api_key = vars.get("ANTHROPIC_API_KEY");
        if provider == ProviderKind::Claude && api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()));
        }

        let llm = LlmConfig {
            provider,
            api_key,
            model: vars.get("FORGE_LLM_MODEL").unwrap_or(defaults.llm.model),
            base_url: vars.url("FORGE_LLM_BASE_URL", defaults.llm.base_url)?,
            cache_dir: vars.get("FORGE_LLM_CACHE_DIR").map(PathBuf::from),
        };

        let food_db = FoodDbConfig {
            api_key: vars.get("USDA_API_KEY"),
            base_url: vars.url("FORGE_USDA_BASE_URL", defaults.food_db.base_url)?,
            page_size: vars.parse("FORGE_USDA_PAGE_SIZE", defaults.food_db.page_size)?,
            food_file: vars.get("FORGE_FOOD_FILE").map(PathBuf::from),
        };

        let d = defaults.ingest;
        let ingest = IngestConfig {
            acceptance_threshold: vars.unit_interval("FORGE_ACCEPT_THRESHOLD", d.acceptance_threshold)?,
            acceptance_margin: vars.unit_interval("FORGE_ACCEPT_MARGIN", d.acceptance_margin)?,
            min_similarity: vars.unit_interval("FORGE_MIN_SIMILARITY", d.min_similarity)?,
            clarification_candidates: vars.positive("FORGE_CLARIFY_CANDIDATES", d.clarification_candidates)?,
            max_concurrency: vars.positive("FORGE_MAX_CONCURRENCY", d.max_concurrency)?,
            call_timeout: Duration::from_millis(
                vars.parse("FORGE_CALL_TIMEOUT_MS", d.call_timeout.as_millis() as u64)?,
            ),
            clarification_ttl: chrono::Duration::hours(vars.bounded(
                "FORGE_CLARIFY_TTL_HOURS",
                d.clarification_ttl.num_hours(),
                MAX_CLARIFY_TTL_HOURS,
            )?),
            weight_unit: vars.parse("FORGE_WEIGHT_UNIT", d.weight_unit)?,
            recent_window: chrono::Duration::days(vars.bounded(
                "FORGE_RECENT_DAYS",
                d.recent_window.num_days(),
                MAX_RECENT_DAYS,
            )?),
        };

        let retry = RetryPolicy {
            max_attempts: vars.positive("FORGE_RETRY_ATTEMPTS", defaults.retry.max_attempts as usize)? as u32,
            initial_backoff: Duration::from_millis(vars.parse(
                "FORGE_RETRY_BACKOFF_MS",
                defaults.retry.initial_backoff.as_millis() as u64,
            )?),
            multiplier: defaults.retry.multiplier,
        };

        let timezone = match vars.get("FORGE_TIMEZONE") {
            Some(name) => name.parse::<Tz>().map_err(|e| ConfigError::InvalidValue {
                name: "FORGE_TIMEZONE".to_string(),
                value: name.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.timezone,
        };

        Ok(Self {
            llm,
            food_db,
            ingest,
            retry,
            timezone,
            data_dir: vars
                .get("FORGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    /// Get the default data directory: ~/.forge
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".forge"))
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                name: name.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn unit_interval(&self, name: &str, default: f64) -> Result<f64, ConfigError> {
        let value = self.parse(name, default)?;
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(invalid(name, value, "must be between 0 and 1"))
        }
    }

    fn positive(&self, name: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse(name, default)?;
        if value >= 1 {
            Ok(value)
        } else {
            Err(invalid(name, value, "must be at least 1"))
        }
    }

    fn bounded(&self, name: &str, default: i64, max: i64) -> Result<i64, ConfigError> {
        let value = self.parse(name, default)?;
        if (1..=max).contains(&value) {
            Ok(value)
        } else {
            Err(invalid(name, value, &format!("must be between 1 and {max}")))
        }
    }

    fn url(&self, name: &str, default: String) -> Result<String, ConfigError> {
        let value = self.get(name).unwrap_or(default);
        url::Url::parse(&value).map_err(|e| invalid(name, &value, &e.to_string()))?;
        Ok(value.trim_end_matches('/').to_string())
    }
}

fn invalid(name: &str, value: impl std::fmt::Display, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ForgeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ForgeConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_with_fake_provider() {
        let config = load(&[("FORGE_LLM_PROVIDER", "fake")]).unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Fake);
        assert_eq!(config.ingest.acceptance_threshold, 0.75);
        assert_eq!(config.ingest.acceptance_margin, 0.15);
        assert_eq!(config.ingest.max_concurrency, 8);
        assert_eq!(config.ingest.call_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.timezone, chrono_tz::America::New_York);
        assert_eq!(config.food_db.base_url, DEFAULT_USDA_BASE_URL);
    }

    #[test]
    fn test_claude_requires_key() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "ANTHROPIC_API_KEY"));

        let config = load(&[("ANTHROPIC_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Claude);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = load(&[
            ("FORGE_LLM_PROVIDER", "fake"),
            ("FORGE_ACCEPT_THRESHOLD", "1.5"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "FORGE_ACCEPT_THRESHOLD"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = load(&[("FORGE_LLM_PROVIDER", "fake"), ("FORGE_MAX_CONCURRENCY", "0")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FORGE_LLM_PROVIDER", "fake"),
            ("FORGE_ACCEPT_MARGIN", "0.2"),
            ("FORGE_WEIGHT_UNIT", "kg"),
            ("FORGE_TIMEZONE", "Europe/Paris"),
            ("FORGE_USDA_BASE_URL", "http://localhost:9000/fdc/"),
            ("FORGE_CALL_TIMEOUT_MS", "1500"),
        ])
        .unwrap();
        assert_eq!(config.ingest.acceptance_margin, 0.2);
        assert_eq!(config.ingest.weight_unit, BodyWeightUnit::Kilograms);
        assert_eq!(config.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.food_db.base_url, "http://localhost:9000/fdc");
        assert_eq!(config.ingest.call_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_duration_vars_are_bounded() {
        for name in ["FORGE_CLARIFY_TTL_HOURS", "FORGE_RECENT_DAYS"] {
            for value in ["0", "-5", "3000000000", "99999999999999999"] {
                let err = load(&[("FORGE_LLM_PROVIDER", "fake"), (name, value)]).unwrap_err();
                assert!(
                    matches!(err, ConfigError::InvalidValue { name: ref n, .. } if n == name),
                    "{name}={value} should be rejected"
                );
            }
        }

        let config = load(&[
            ("FORGE_LLM_PROVIDER", "fake"),
            ("FORGE_CLARIFY_TTL_HOURS", "8760"),
            ("FORGE_RECENT_DAYS", "1"),
        ])
        .unwrap();
        assert_eq!(config.ingest.clarification_ttl, chrono::Duration::hours(8760));
        assert_eq!(config.ingest.recent_window, chrono::Duration::days(1));
    }

    #[test]
    fn test_bad_timezone() {
        let err = load(&[("FORGE_LLM_PROVIDER", "fake"), ("FORGE_TIMEZONE", "Mars/Olympus")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_retry_backoff_curve() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
    }
}
