//! Multi-tenant retrieval engine.
//!
//! Every tenant owns an isolated document table. Writers to the same tenant
//! are serialized, the similarity index is built after the first successful
//! write, and searches fuse nearest-neighbour similarity with BM25 keyword
//! relevance.
//!
//! # Components
//!
//! - [`RagStore`]: Document operations, searches, index administration
//! - [`TenantTableRegistry`]: Creates and caches per-tenant tables
//! - [`IndexManager`]: Builds each tenant's index exactly once
//! - [`UserLockRegistry`]: Per-tenant write locks
//! - [`retry_with_backoff`]: Exponential backoff with cancellation
//! - [`Config`]: TOML configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use ragstore::{HybridSearchOptions, RagStore, StoreOptions};
//! use ragstore_store::MemoryConnector;
//! use tokio_util::sync::CancellationToken;
//!
//! let connector = MemoryConnector::new();
//! let store = RagStore::connect(&connector, "memory://demo", StoreOptions::new(384)).await?;
//! let cancel = CancellationToken::new();
//!
//! store.add_documents(&cancel, "alice", documents).await?;
//!
//! let hits = store
//!     .hybrid_search(&cancel, "alice", "dog", &query_embedding, &HybridSearchOptions::default())
//!     .await?;
//! for hit in hits {
//!     println!("{} {:.3}", hit.id(), hit.score());
//! }
//! ```

pub mod bm25;
pub mod config;
pub mod documents;
pub mod hybrid;
pub mod index_manager;
pub mod locks;
pub mod logging;
pub mod progress;
pub mod rerank;
pub mod retry;
pub mod search;
pub mod store;
pub mod tenant;

pub use bm25::Bm25;
pub use config::Config;
pub use hybrid::HybridSearchOptions;
pub use index_manager::IndexManager;
pub use locks::UserLockRegistry;
pub use logging::init_logging;
pub use progress::{Progress, ProgressCallback, ProgressTracker};
pub use rerank::{CustomScorerReranker, ReciprocalRankFusionReranker, Reranker};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use search::SearchOptions;
pub use store::{HealthStatus, RagStore, StoreOptions};
pub use tenant::{validate_tenant_id, TenantTableRegistry};
