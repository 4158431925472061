//! # ragstore-embed
//!
//! Embedding-side building blocks for ragstore. Real providers (HTTP APIs,
//! local models) live outside this workspace and plug in through
//! [`EmbeddingProvider`](ragstore_core::EmbeddingProvider); this crate wraps
//! them.
//!
//! ## Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`LruEmbeddingCache`] | Bounded LRU cache of query embeddings keyed by blake3 digest |
//! | [`CachedEmbeddingProvider`] | Serves repeated texts from a cache, embeds the rest in one call |
//! | [`RateLimitedEmbeddingProvider`] | Token-bucket request limiting with cancellation |
//! | [`HashEmbedder`] | Deterministic hash-based embedder for development and tests |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ragstore_embed::{CachedEmbeddingProvider, LruEmbeddingCache, RateLimitedEmbeddingProvider};
//! use std::sync::Arc;
//!
//! let limited = Arc::new(RateLimitedEmbeddingProvider::new(remote, 10.0, 20)?);
//! let provider = CachedEmbeddingProvider::new(limited, Arc::new(LruEmbeddingCache::new(1000)), None);
//! let v = provider.generate_embedding(&cancel, "what is a tenant?").await?;
//! ```

pub mod cache;
pub mod hash;
pub mod rate_limit;

pub use cache::{
    CacheStats, CachedEmbeddingProvider, EmbeddingCache, LruEmbeddingCache,
    DEFAULT_CACHE_CAPACITY,
};
pub use hash::HashEmbedder;
pub use rate_limit::{RateLimitedEmbeddingProvider, RateLimiter};
