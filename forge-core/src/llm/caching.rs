//! Caching wrapper for LLM providers.
//!
//! Wraps any LlmProvider to cache responses on disk. The cache key is based on
//! the provider name, model name, and a hash of the system and user prompts.
//! Used for replaying extraction runs offline; the ingestion pipeline itself
//! keeps no state between calls.

use super::{CompletionRequest, LlmError, LlmProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

/// Cached LLM response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    pub cached_at: DateTime<Utc>,
}

/// A caching wrapper around any LLM provider.
///
/// Same request to same model always returns the same cached response.
#[derive(Debug)]
pub struct CachingProvider {
    inner: Box<dyn LlmProvider>,
    cache_dir: PathBuf,
}

impl CachingProvider {
    pub fn new(inner: Box<dyn LlmProvider>, cache_dir: PathBuf) -> Self {
        Self { inner, cache_dir }
    }

    /// Uses SHA-256 for stable hashing across Rust versions.
    fn cache_key(&self, request: &CompletionRequest) -> String {
        let mut hasher = Sha256::new();
        if let Some(system) = &request.system {
            hasher.update(system.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(request.prompt.as_bytes());
        let result = hasher.finalize();

        // First 16 bytes keep filenames short
        hex::encode(&result[..16])
    }

    fn provider_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .join(self.inner.provider_name())
            .join(self.inner.model_name().replace(['/', ':'], "_"))
    }

    fn cache_path(&self, prompt_hash: &str) -> PathBuf {
        self.provider_cache_dir()
            .join(format!("{}.json", prompt_hash))
    }

    fn get_cached(&self, prompt_hash: &str) -> Option<String> {
        let content = fs::read_to_string(self.cache_path(prompt_hash)).ok()?;
        let cached = serde_json::from_str::<CachedLlmResponse>(&content).ok()?;
        tracing::debug!(
            provider = self.inner.provider_name(),
            model = self.inner.model_name(),
            prompt_hash = prompt_hash,
            "LLM cache hit"
        );
        Some(cached.response)
    }

    fn save_to_cache(&self, prompt_hash: &str, response: &str) -> Result<(), LlmError> {
        let dir = self.provider_cache_dir();
        fs::create_dir_all(&dir).map_err(|e| LlmError::CacheError(e.to_string()))?;

        let cached = CachedLlmResponse {
            metadata: CacheMetadata {
                provider: self.inner.provider_name().to_string(),
                model: self.inner.model_name().to_string(),
                prompt_hash: prompt_hash.to_string(),
                cached_at: Utc::now(),
            },
            response: response.to_string(),
        };

        let content = serde_json::to_string_pretty(&cached)
            .map_err(|e| LlmError::CacheError(e.to_string()))?;
        fs::write(self.cache_path(prompt_hash), content)
            .map_err(|e| LlmError::CacheError(e.to_string()))?;

        tracing::debug!(
            provider = self.inner.provider_name(),
            model = self.inner.model_name(),
            prompt_hash = prompt_hash,
            "LLM response cached"
        );

        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        if let Ok(entries) = fs::read_dir(self.provider_cache_dir()) {
            stats.cached_responses = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count();
        }

        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedLlmResponse {
    metadata: CacheMetadata,
    response: String,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub cached_responses: usize,
}

#[async_trait]
impl LlmProvider for CachingProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let prompt_hash = self.cache_key(request);

        if let Some(cached) = self.get_cached(&prompt_hash) {
            return Ok(cached);
        }

        tracing::debug!(
            provider = self.inner.provider_name(),
            model = self.inner.model_name(),
            prompt_hash = %prompt_hash,
            "LLM cache miss, calling provider"
        );

        let response = self.inner.complete(request).await?;

        if let Err(e) = self.save_to_cache(&prompt_hash, &response) {
            tracing::warn!(error = %e, "Failed to cache LLM response");
        }

        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeProvider;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_caching_provider() {
        let temp_dir = TempDir::new().unwrap();
        let fake = Box::new(FakeProvider::with_response("hello", "world"));
        let provider = CachingProvider::new(fake, temp_dir.path().to_path_buf());

        let request = CompletionRequest::new("hello there");
        assert_eq!(provider.complete(&request).await.unwrap(), "world");
        assert_eq!(provider.complete(&request).await.unwrap(), "world");

        assert_eq!(provider.cache_stats().cached_responses, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_inner_failure() {
        let temp_dir = TempDir::new().unwrap();
        let request = CompletionRequest::new("hello there");

        let warm = CachingProvider::new(
            Box::new(FakeProvider::with_response("hello", "world")),
            temp_dir.path().to_path_buf(),
        );
        warm.complete(&request).await.unwrap();

        // Same provider/model names, but every call would fail
        let cold = CachingProvider::new(
            Box::new(FakeProvider::new().with_failures(10)),
            temp_dir.path().to_path_buf(),
        );
        assert_eq!(cold.complete(&request).await.unwrap(), "world");
    }

    #[tokio::test]
    async fn test_system_prompt_changes_key() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CachingProvider::new(
            Box::new(FakeProvider::with_response("hello", "world")),
            temp_dir.path().to_path_buf(),
        );

        provider
            .complete(&CompletionRequest::new("hello").with_system("v1"))
            .await
            .unwrap();
        provider
            .complete(&CompletionRequest::new("hello").with_system("v2"))
            .await
            .unwrap();

        assert_eq!(provider.cache_stats().cached_responses, 2);
    }
}
