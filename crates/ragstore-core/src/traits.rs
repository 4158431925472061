//! Collaborator traits.
//!
//! The engine never talks to a concrete database or model. It is written
//! against these seams:
//!
//! - [`StoreConnector`] / [`StoreConnection`] / [`StoreTable`]: the vector
//!   storage backend
//! - [`EmbeddingProvider`]: turns text into vectors
//!
//! Implementations live in `ragstore-store` and `ragstore-embed`.

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{EmbedError, StoreError};
use crate::types::{AddMode, Document, IndexConfig, QueryRow, VectorQuery};

// ============================================================================
// Vector Storage
// ============================================================================

/// Opens connections to a storage backend.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connect to the database at `uri`.
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StoreConnection>, StoreError>;
}

/// A live connection to a storage backend.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Open an existing table. Missing tables are [`StoreError::TableNotFound`].
    async fn open_table(&self, name: &str) -> Result<Arc<dyn StoreTable>, StoreError>;

    /// Create an empty table. Existing tables are
    /// [`StoreError::TableAlreadyExists`].
    async fn create_table(
        &self,
        name: &str,
        schema: SchemaRef,
    ) -> Result<Arc<dyn StoreTable>, StoreError>;

    /// Names of all tables in the database.
    async fn table_names(&self) -> Result<Vec<String>, StoreError>;

    /// Release the connection.
    async fn close(&self) -> Result<(), StoreError>;
}

/// A handle to one table.
#[async_trait]
pub trait StoreTable: Send + Sync {
    /// Table name.
    fn name(&self) -> &str;

    /// Write rows.
    async fn add(&self, rows: Vec<Document>, mode: AddMode) -> Result<(), StoreError>;

    /// Delete rows matching `predicate`.
    async fn delete(&self, predicate: &str) -> Result<(), StoreError>;

    /// Build a similarity index on `column`.
    async fn create_index(&self, column: &str, config: &IndexConfig) -> Result<(), StoreError>;

    /// Run a filtered scan or nearest-neighbour query.
    async fn query(&self, query: VectorQuery) -> Result<Vec<QueryRow>, StoreError>;

    /// Count rows, optionally restricted by `predicate`.
    async fn count_rows(&self, predicate: Option<&str>) -> Result<u64, StoreError>;
}

// ============================================================================
// Embedding
// ============================================================================

/// Trait for generating embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding dimension.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order.
    async fn generate_embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn generate_embedding(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<Vec<f32>, EmbedError> {
        let results = self
            .generate_embeddings(cancel, &[text.to_string()])
            .await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        output: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn generate_embeddings(
            &self,
            _cancel: &CancellationToken,
            _texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_generate_embedding_takes_first() {
        let embedder = FixedEmbedder {
            output: vec![vec![1.0, 2.0]],
        };
        let cancel = CancellationToken::new();
        let v = embedder.generate_embedding(&cancel, "hello").await.unwrap();
        assert_eq!(v, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_generate_embedding_empty_result() {
        let embedder = FixedEmbedder { output: vec![] };
        let cancel = CancellationToken::new();
        let err = embedder.generate_embedding(&cancel, "hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Inference(_)));
    }
}
