//! Arrow schema of the per-tenant document table.

use arrow_schema::{DataType, Field, Schema};
use ragstore_core::columns;
use std::sync::Arc;

/// Schema for a tenant's documents table.
#[must_use]
pub fn documents_schema(embedding_dim: usize) -> Schema {
    Schema::new(vec![
        // Identity
        Field::new(columns::ID, DataType::Utf8, false),
        // Content
        Field::new(columns::TEXT, DataType::Utf8, false),
        Field::new(columns::DOCUMENT_NAME, DataType::Utf8, false),
        // Embedding
        Field::new(
            columns::EMBEDDING,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                embedding_dim as i32,
            ),
            false,
        ),
        // JSON-encoded metadata
        Field::new(columns::METADATA, DataType::Utf8, true),
    ])
}

/// Embedding dimension declared by a documents schema.
pub fn embedding_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(columns::EMBEDDING).ok()?.data_type() {
        DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
        _ => None,
    }
}
