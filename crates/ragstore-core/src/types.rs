//! Core types for ragstore.
//!
//! ## Documents
//! - [`Document`]: A text segment with its embedding and metadata
//! - [`columns`]: Column names of the fixed per-tenant table schema
//!
//! ## Indexing
//! - [`IndexConfig`]: Index type, metric and tuning for a tenant's table
//! - [`IndexType`] / [`DistanceMetric`]
//!
//! ## Queries
//! - [`VectorQuery`]: Builder for backend queries
//! - [`QueryRow`]: A row returned by the backend
//! - [`SearchResult`] / [`HybridSearchResult`]: What searches return
//! - [`DocumentNamePage`]: One page of distinct document names

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form document metadata.
pub type Metadata = Map<String, Value>;

/// Column names of the per-tenant document table.
pub mod columns {
    pub const ID: &str = "id";
    pub const TEXT: &str = "text";
    pub const DOCUMENT_NAME: &str = "document_name";
    pub const EMBEDDING: &str = "embedding";
    pub const METADATA: &str = "metadata";
    /// Virtual column carrying the distance of a nearest-neighbour query.
    pub const DISTANCE: &str = "_distance";

    /// Columns that may appear as keys in a search filter.
    pub const FILTERABLE: &[&str] = &[ID, TEXT, DOCUMENT_NAME, METADATA];
}

// ============================================================================
// Documents
// ============================================================================

/// A unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier, unique within a tenant by convention
    pub id: String,
    /// The text body
    pub text: String,
    /// Groups segments belonging to the same source document
    pub document_name: String,
    /// Embedding vector; must have exactly the store's dimension
    pub embedding: Vec<f32>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        document_name: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            document_name: document_name.into(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata as stored in the `metadata` column (`{}` when empty).
    pub fn metadata_json(&self) -> Result<String, serde_json::Error> {
        encode_metadata(&self.metadata)
    }
}

/// Serialize metadata for storage.
pub fn encode_metadata(metadata: &Metadata) -> Result<String, serde_json::Error> {
    serde_json::to_string(metadata)
}

/// Parse a stored metadata string. An empty string is an empty map.
pub fn decode_metadata(raw: &str) -> Result<Metadata, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_str(raw)
}

// ============================================================================
// Indexing
// ============================================================================

/// Approximate nearest-neighbour index families supported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    #[default]
    IvfPq,
    IvfFlat,
    IvfHnswSq,
}

/// Distance metric for vector search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Dot,
}

/// Index configuration for one tenant's table.
///
/// `None` tuning values let the backend pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub index_type: IndexType,
    pub metric: DistanceMetric,
    pub num_partitions: Option<u32>,
    pub num_sub_vectors: Option<u32>,
    /// Replace an existing index on the same column
    pub replace: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_type: IndexType::IvfPq,
            metric: DistanceMetric::Cosine,
            num_partitions: None,
            num_sub_vectors: None,
            replace: true,
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// How rows are written to a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddMode {
    #[default]
    Append,
    Overwrite,
}

// ============================================================================
// Queries
// ============================================================================

/// A backend query, built fluently.
///
/// Without [`nearest_to`](Self::nearest_to) it is a plain filtered scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQuery {
    pub vector: Option<Vec<f32>>,
    pub distance_type: Option<DistanceMetric>,
    pub filter: Option<String>,
    pub limit: Option<usize>,
    /// Columns to project; `None` returns every column
    pub select: Option<Vec<String>>,
}

impl VectorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn nearest_to(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    #[must_use]
    pub fn distance_type(mut self, metric: DistanceMetric) -> Self {
        self.distance_type = Some(metric);
        self
    }

    /// Restrict rows to those matching a SQL-like predicate.
    #[must_use]
    pub fn only_if(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = Some(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Whether `column` is part of the projection.
    pub fn selects(&self, column: &str) -> bool {
        self.select
            .as_ref()
            .map_or(true, |cols| cols.iter().any(|c| c == column))
    }
}

/// A row returned by [`StoreTable::query`](crate::StoreTable::query).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub document: Document,
    /// Present for nearest-neighbour queries
    pub distance: Option<f32>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub document_name: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    /// Backend distance for vector search (lower is closer), otherwise the
    /// score of whichever ranking produced this result
    pub score: f32,
}

impl SearchResult {
    /// Build a result from a document and a score.
    pub fn from_document(document: Document, score: f32) -> Self {
        Self {
            id: document.id,
            text: document.text,
            document_name: document.document_name,
            embedding: document.embedding,
            metadata: document.metadata,
            score,
        }
    }
}

impl From<QueryRow> for SearchResult {
    fn from(row: QueryRow) -> Self {
        let score = row.distance.unwrap_or(0.0);
        Self::from_document(row.document, score)
    }
}

/// A hybrid search hit. `result.score` is the fused score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchResult {
    #[serde(flatten)]
    pub result: SearchResult,
    /// Normalized vector similarity, if the vector leg returned this document
    pub vector_score: Option<f32>,
    /// Normalized BM25 score, if the keyword leg returned this document
    pub keyword_score: Option<f32>,
    /// 0-based rank in the vector leg
    pub vector_rank: Option<usize>,
    /// 0-based rank in the keyword leg
    pub keyword_rank: Option<usize>,
}

impl HybridSearchResult {
    pub fn id(&self) -> &str {
        &self.result.id
    }

    pub fn score(&self) -> f32 {
        self.result.score
    }
}

/// One page of distinct document names, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNamePage {
    pub names: Vec<String>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==================== Document Tests ====================

    #[test]
    fn test_document_with_metadata() {
        let doc = Document::new("a", "dog runs fast", "pets.md", vec![0.0; 4])
            .with_metadata("lang", "en")
            .with_metadata("page", 3);
        assert_eq!(doc.metadata.get("lang"), Some(&json!("en")));
        assert_eq!(doc.metadata.get("page"), Some(&json!(3)));
    }

    #[test]
    fn test_empty_metadata_encodes_as_empty_object() {
        let doc = Document::new("a", "t", "n", vec![]);
        assert_eq!(doc.metadata_json().unwrap(), "{}");
    }

    #[test]
    fn test_decode_metadata_empty_string() {
        assert!(decode_metadata("").unwrap().is_empty());
        assert!(decode_metadata("  ").unwrap().is_empty());
    }

    #[test]
    fn test_decode_metadata_rejects_garbage() {
        assert!(decode_metadata("{not json").is_err());
    }

    // ==================== Index Tests ====================

    #[test]
    fn test_index_config_default() {
        let cfg = IndexConfig::default();
        assert_eq!(cfg.index_type, IndexType::IvfPq);
        assert_eq!(cfg.metric, DistanceMetric::Cosine);
        assert_eq!(cfg.num_partitions, None);
        assert!(cfg.replace);
    }

    #[test]
    fn test_index_type_serialization() {
        assert_eq!(
            serde_json::to_string(&IndexType::IvfHnswSq).unwrap(),
            "\"ivf_hnsw_sq\""
        );
        assert_eq!(serde_json::to_string(&DistanceMetric::L2).unwrap(), "\"l2\"");
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_vector_query_builder() {
        let q = VectorQuery::new()
            .nearest_to(vec![1.0, 0.0])
            .distance_type(DistanceMetric::Dot)
            .only_if("document_name = 'x'")
            .limit(5)
            .select(&[columns::ID, columns::TEXT]);
        assert_eq!(q.vector.as_deref(), Some(&[1.0, 0.0][..]));
        assert_eq!(q.distance_type, Some(DistanceMetric::Dot));
        assert_eq!(q.filter.as_deref(), Some("document_name = 'x'"));
        assert_eq!(q.limit, Some(5));
        assert!(q.selects(columns::ID));
        assert!(!q.selects(columns::EMBEDDING));
    }

    #[test]
    fn test_unprojected_query_selects_everything() {
        assert!(VectorQuery::new().selects(columns::METADATA));
    }

    #[test]
    fn test_search_result_from_row_uses_distance() {
        let row = QueryRow {
            document: Document::new("a", "t", "n", vec![1.0]),
            distance: Some(0.25),
        };
        let result = SearchResult::from(row);
        assert_eq!(result.id, "a");
        assert!((result.score - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_hybrid_result_flattens() {
        let hit = HybridSearchResult {
            result: SearchResult::from_document(Document::new("a", "t", "n", vec![]), 0.9),
            vector_score: Some(1.0),
            keyword_score: None,
            vector_rank: Some(0),
            keyword_rank: None,
        };
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["id"], json!("a"));
        assert_eq!(value["vector_rank"], json!(0));
        assert_eq!(hit.id(), "a");
    }
}
