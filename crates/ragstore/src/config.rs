//! Configuration handling for ragstore.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::hybrid::HybridSearchOptions;
use crate::retry::RetryPolicy;
use directories::ProjectDirs;
use ragstore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Retry configuration for batch writes
    #[serde(default)]
    pub retry: RetryConfig,

    /// Connection pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Query embedding cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Read and validate a TOML config file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// An annotated config file with every default spelled out.
    pub fn sample_toml() -> &'static str {
        SAMPLE_TOML
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.uri.trim().is_empty() {
            return Err(Error::Config("store.uri cannot be empty".into()));
        }
        if self.store.embedding_dim == 0 {
            return Err(Error::Config("store.embedding_dim must be positive".into()));
        }
        if self.store.max_batch_size == 0 {
            return Err(Error::Config("store.max_batch_size must be positive".into()));
        }
        if self.search.default_limit == 0 {
            return Err(Error::Config("search.default_limit must be positive".into()));
        }
        let hybrid = self.search.hybrid_options();
        hybrid
            .normalized_weights()
            .map_err(|e| Error::Config(format!("search weights: {e}")))?;
        hybrid
            .keyword_floor()
            .map_err(|e| Error::Config(format!("search.min_keyword_score: {e}")))?;
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(self.retry.backoff_multiplier >= 1.0 && self.retry.backoff_multiplier.is_finite()) {
            return Err(Error::Config(
                "retry.backoff_multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.initial_delay_ms cannot exceed retry.max_delay_ms".into(),
            ));
        }
        if self.pool.max_connections == 0 {
            return Err(Error::Config("pool.max_connections must be at least 1".into()));
        }
        Ok(())
    }

    /// The retry policy, if retries are enabled.
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.enabled.then(|| self.retry.policy())
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend location
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Length of every stored embedding
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Rows per insert call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_uri() -> String {
    data_dir()
        .map(|d| d.join("lancedb"))
        .unwrap_or_else(|| PathBuf::from("ragstore-data"))
        .to_string_lossy()
        .into_owned()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            embedding_dim: default_embedding_dim(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Search-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default result limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_weight")]
    pub keyword_weight: f32,

    /// Raw BM25 score a keyword candidate needs (0 keeps every candidate)
    #[serde(default)]
    pub min_keyword_score: f32,

    /// Row ceiling for the keyword leg (0 disables the check)
    #[serde(default = "default_max_documents_for_bm25")]
    pub max_documents_for_bm25: usize,
}

fn default_limit() -> usize {
    10
}

fn default_weight() -> f32 {
    0.5
}

fn default_max_documents_for_bm25() -> usize {
    10_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            vector_weight: default_weight(),
            keyword_weight: default_weight(),
            min_keyword_score: 0.0,
            max_documents_for_bm25: default_max_documents_for_bm25(),
        }
    }
}

impl SearchConfig {
    /// Hybrid options carrying this section's limit, weights and keyword floor.
    pub fn hybrid_options(&self) -> HybridSearchOptions {
        HybridSearchOptions::default()
            .with_limit(self.default_limit)
            .with_weights(self.vector_weight, self.keyword_weight)
            .with_min_keyword_score(self.min_keyword_score)
    }
}

/// Retry-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_retry_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    4
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// Query embedding cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries kept (0 means the default)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_capacity() -> usize {
    ragstore_embed::DEFAULT_CACHE_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional)
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Get the data directory for ragstore.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("RAGSTORE_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "ragstore").map(|dirs| dirs.data_dir().to_path_buf())
}

const SAMPLE_TOML: &str = r#"# ragstore configuration

[store]
# Backend location. Defaults to <data dir>/lancedb.
# uri = "/var/lib/ragstore/lancedb"
embedding_dim = 384
max_batch_size = 1000

[search]
default_limit = 10
vector_weight = 0.5
keyword_weight = 0.5
# Keyword matches scoring below this raw BM25 score are ignored.
min_keyword_score = 0.0
# Hybrid search refuses tenants with more rows than this. 0 disables the check.
max_documents_for_bm25 = 10000

[retry]
enabled = true
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 10000
backoff_multiplier = 2.0

[pool]
max_connections = 4

[cache]
capacity = 1000

[logging]
level = "info"
# file = "/var/log/ragstore.log"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store.max_batch_size, 1000);
        assert_eq!(config.search.max_documents_for_bm25, 10_000);
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry_policy(), Some(RetryPolicy::default()));
        config.validate().unwrap();
    }

    #[test]
    fn test_sample_parses_to_defaults() {
        let config = Config::from_toml_str(Config::sample_toml()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.search, defaults.search);
        assert_eq!(config.retry, defaults.retry);
        assert_eq!(config.pool, defaults.pool);
        assert_eq!(config.cache, defaults.cache);
        assert_eq!(config.store.embedding_dim, defaults.store.embedding_dim);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [store]
            uri = "memory://test"
            embedding_dim = 4

            [retry]
            enabled = true
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.store.uri, "memory://test");
        assert_eq!(config.store.max_batch_size, 1000);

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = Config::from_toml_str("[store\nuri = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        fn rejected(mutate: impl FnOnce(&mut Config)) -> bool {
            let mut config = Config::default();
            mutate(&mut config);
            matches!(config.validate(), Err(Error::Config(_)))
        }

        assert!(rejected(|c| c.store.uri = " ".into()));
        assert!(rejected(|c| c.store.embedding_dim = 0));
        assert!(rejected(|c| c.store.max_batch_size = 0));
        assert!(rejected(|c| c.search.default_limit = 0));
        assert!(rejected(|c| {
            c.search.vector_weight = 0.0;
            c.search.keyword_weight = 0.0;
        }));
        assert!(rejected(|c| c.search.keyword_weight = -1.0));
        assert!(rejected(|c| c.search.min_keyword_score = -0.5));
        assert!(rejected(|c| c.retry.max_attempts = 0));
        assert!(rejected(|c| c.retry.backoff_multiplier = 0.5));
        assert!(rejected(|c| c.retry.initial_delay_ms = 20_000));
        assert!(rejected(|c| c.pool.max_connections = 0));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nmax_connections = 8").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.pool.max_connections, 8);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from("/nonexistent/ragstore.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_load_from_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nembedding_dim = 0").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_search_hybrid_options() {
        let search = SearchConfig {
            default_limit: 7,
            vector_weight: 0.2,
            keyword_weight: 0.8,
            min_keyword_score: 1.5,
            ..SearchConfig::default()
        };
        let opts = search.hybrid_options();
        assert_eq!(opts.limit, 7);
        assert_eq!(opts.vector_weight, 0.2);
        assert_eq!(opts.keyword_floor().unwrap(), Some(1.5));
    }
}
