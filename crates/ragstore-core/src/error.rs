//! Error types for ragstore.
//!
//! The taxonomy follows the layers of the system: [`StoreError`] for the
//! storage backend and connection pool, [`EmbedError`] for embedding
//! providers, and [`Error`] for everything the engine surfaces to callers.

use std::fmt;
use thiserror::Error;

/// Substrings that mark an error message as permanent.
///
/// Matching is case-sensitive and applied to the fully rendered message,
/// including wrapped causes.
pub const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "dimension mismatch",
    "invalid",
    "cannot be empty",
    "too long",
    "parse",
    "decode",
    "encode",
];

/// Main error type for ragstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied bad input (tenant id, embedding dimension, weights, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// A table or document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage backend failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Embedding provider failure
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// A configured ceiling was hit; `hint` names the knob to adjust
    #[error("resource exhausted: {message}; {hint}")]
    ResourceExhausted { message: String, hint: String },

    /// The operation was cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,

    /// Every retry attempt failed
    #[error("max retry attempts ({attempts}) exceeded: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// One leg of a hybrid search failed
    #[error("{leg} failed: {source}")]
    Search {
        leg: SearchLeg,
        #[source]
        source: Box<Error>,
    },

    /// JSON (de)serialization of metadata failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap `source` with the identity of the search leg that produced it.
    pub fn search_leg(leg: SearchLeg, source: Error) -> Self {
        Self::Search {
            leg,
            source: Box::new(source),
        }
    }

    /// Whether retrying the failed operation could plausibly succeed.
    ///
    /// Validation failures and cancellation are never retried. Everything
    /// else is transient unless its message matches one of
    /// [`NON_RETRYABLE_PATTERNS`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Cancelled => false,
            Self::Embedding(EmbedError::Cancelled) => false,
            _ => {
                let msg = self.to_string();
                !NON_RETRYABLE_PATTERNS.iter().any(|p| msg.contains(p))
            }
        }
    }

    /// True for cancellation at any layer.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled | Self::Embedding(EmbedError::Cancelled) => true,
            Self::RetryExhausted { source, .. } | Self::Search { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store",
            Self::Embedding(_) => "embedding",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Cancelled => "cancelled",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Search { .. } => "search",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }

    /// True for missing tables or documents at any layer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Store(StoreError::TableNotFound(_))
        )
    }
}

/// Identifies which part of a hybrid search failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLeg {
    /// Generating the query embedding
    Embedding,
    /// Nearest-neighbour query
    Vector,
    /// BM25 keyword scoring
    Keyword,
}

impl fmt::Display for SearchLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => write!(f, "query embedding generation"),
            Self::Vector => write!(f, "vector search"),
            Self::Keyword => write!(f, "keyword search"),
        }
    }
}

/// Storage backend and connection pool errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("index build failed: {0}")]
    Index(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid predicate: {0}")]
    Predicate(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("connection pool is full")]
    PoolFull,

    #[error("max pool size must be positive, got {0}")]
    InvalidPoolSize(usize),

    #[error("global connection pool already initialized")]
    PoolAlreadyInitialized,

    #[error("global connection pool not initialized")]
    PoolNotInitialized,

    #[error(
        "connection pool exhausted: all {capacity} connections are leased; increase pool.max_connections"
    )]
    PoolExhausted { capacity: usize },
}

/// Embedding provider errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("rate limiter error: {0}")]
    RateLimited(String),

    #[error("embedding request cancelled")]
    Cancelled,
}

/// Result type alias for ragstore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    // ========== StoreError Tests ==========

    #[test]
    fn test_store_error_table_not_found_display() {
        let err = StoreError::TableNotFound("rag_user_alice".to_string());
        assert_eq!(err.to_string(), "table not found: rag_user_alice");
    }

    #[test]
    fn test_pool_exhausted_names_knob() {
        let err = StoreError::PoolExhausted { capacity: 4 };
        let msg = err.to_string();
        assert!(msg.contains("all 4 connections"));
        assert!(msg.contains("pool.max_connections"));
    }

    // ========== Main Error Tests ==========

    #[test]
    fn test_error_from_store_error() {
        let store_err = StoreError::Query("timeout".to_string());
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_error_from_embed_error() {
        let err: Error = EmbedError::Inference("model offline".to_string()).into();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(err.to_string().contains("model offline"));
    }

    #[test]
    fn test_resource_exhausted_display() {
        let err = Error::ResourceExhausted {
            message: "document count (12000) exceeds BM25 limit (10000)".to_string(),
            hint: "raise search.max_documents_for_bm25".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "resource exhausted: document count (12000) exceeds BM25 limit (10000); raise search.max_documents_for_bm25"
        );
    }

    #[test]
    fn test_search_leg_keeps_cause() {
        let err = Error::search_leg(SearchLeg::Keyword, StoreError::Query("boom".into()).into());
        assert_eq!(err.to_string(), "keyword search failed: store error: query failed: boom");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("store error: query failed: boom"));
    }

    // ========== Classification Tests ==========

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!Error::validation("tenant id cannot be empty").is_retryable());
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Embedding(EmbedError::Cancelled).is_retryable());
    }

    #[test]
    fn test_denylist_patterns_are_not_retryable() {
        for msg in ["invalid token", "failed to decode row", "value too long"] {
            let err: Error = StoreError::Query(msg.to_string()).into();
            assert!(!err.is_retryable(), "{msg} should be permanent");
        }
    }

    #[test]
    fn test_store_hiccup_is_retryable() {
        let err: Error = StoreError::Insert("io timeout".to_string()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_cancelled_sees_through_wrappers() {
        let err = Error::RetryExhausted {
            attempts: 3,
            source: Box::new(Error::Cancelled),
        };
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound("doc".into()).is_not_found());
        assert!(Error::Store(StoreError::TableNotFound("t".into())).is_not_found());
        assert!(!Error::Cancelled.is_not_found());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::validation("x").kind(), "validation");
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::Store(StoreError::PoolClosed).kind(), "store");
        assert_eq!(
            Error::search_leg(SearchLeg::Keyword, Error::Cancelled).kind(),
            "search"
        );
    }
}
