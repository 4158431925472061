//! Storage layer for ragstore.
//!
//! This crate provides everything between the engine and a vector database:
//!
//! - **Schema**: the fixed per-tenant documents table ([`schema`])
//! - **Predicates**: filter building, string escaping and an evaluator for
//!   the predicate dialect ([`predicate`])
//! - **Backends**: an in-memory backend ([`memory`]) and, with the `lancedb`
//!   feature, a `LanceDB` backend
//! - **Pooling**: a fixed-size [`ConnectionPool`] and a process-wide
//!   wrapper ([`global`])
//!
//! # Example
//!
//! ```rust,ignore
//! use ragstore_store::{ConnectionPool, MemoryConnector};
//!
//! let pool = ConnectionPool::new(&MemoryConnector::new(), "memory://db", 4).await?;
//! let conn = pool.get().await?;
//! let tables = conn.table_names().await?;
//! pool.put(conn)?;
//! ```

pub mod global;
#[cfg(feature = "lancedb")]
pub mod lancedb;
pub mod memory;
pub mod pool;
pub mod predicate;
pub mod schema;

#[cfg(feature = "lancedb")]
pub use crate::lancedb::LanceConnector;
pub use global::{close_global_pool, global_pool, init_global_pool};
pub use memory::{MemoryConnector, MemoryTable};
pub use pool::ConnectionPool;
pub use predicate::{build_predicate, escape_sql_string, FilterValue, Filters};
pub use schema::documents_schema;
