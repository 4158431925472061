//! # ragstore-core
//!
//! Core types and traits for ragstore, a multi-tenant retrieval layer over a
//! vector database.
//!
//! This crate provides the foundational abstractions used throughout ragstore:
//!
//! - **Vector Storage**: [`StoreConnector`], [`StoreConnection`] and
//!   [`StoreTable`] traits for the storage backend
//! - **Embedding Generation**: [`EmbeddingProvider`] trait for turning text
//!   into vectors
//! - **Metrics**: [`MetricsCollector`] trait with no-op and in-memory
//!   implementations
//! - **Errors**: the [`Error`] taxonomy and retry classification
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Document`] | A text segment with its embedding |
//! | [`IndexConfig`] | Similarity index settings for a tenant |
//! | [`VectorQuery`] | Builder for backend queries |
//! | [`SearchResult`] | A matching document with its score |
//! | [`HybridSearchResult`] | A fused vector and keyword hit |
//!
//! ## Related Crates
//!
//! - `ragstore-store`: table schema, predicates, backends and connection pool
//! - `ragstore-embed`: embedding cache, rate limiting and a hash embedder
//! - `ragstore`: the tenant-aware engine

pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

pub use error::{EmbedError, Error, Result, SearchLeg, StoreError};
pub use metrics::{MetricsCollector, NoopMetrics, OperationStats, OperationTimer, SimpleMetrics};
pub use traits::*;
pub use types::*;
