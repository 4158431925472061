//! In-memory backend for testing without `LanceDB`.
//!
//! [`MemoryConnector`] hands out [`MemoryConnection`]s. Connections to the
//! same URI share one set of tables, so a pool of connections behaves like a
//! pool against a single database. Vector queries are brute force.
//!
//! Tables count index builds and accept injected failures so callers can
//! test their retry and once-only logic.

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use parking_lot::Mutex;
use ragstore_core::{
    columns, AddMode, DistanceMetric, Document, IndexConfig, QueryRow, StoreConnection,
    StoreConnector, StoreError, StoreTable, VectorQuery,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::predicate::Predicate;
use crate::schema;

type Tables = Arc<Mutex<HashMap<String, Arc<MemoryTable>>>>;

/// Connection counters, for asserting lifecycle behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub connects: usize,
    pub closes: usize,
}

/// Connector for the in-memory backend.
///
/// Cloning shares the underlying databases.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    databases: Arc<Mutex<HashMap<String, Tables>>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    /// Fail every connect once this many have succeeded
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connects fail once `n` have succeeded. `None` clears it.
    pub fn fail_connects_after(&self, n: Option<usize>) {
        *self.fail_after.lock() = n;
    }

    pub fn stats(&self) -> ConnectorStats {
        ConnectorStats {
            connects: self.connects.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
        }
    }

    /// Direct handle to a table, bypassing any connection.
    pub fn table(&self, uri: &str, name: &str) -> Option<Arc<MemoryTable>> {
        let db = self.databases.lock().get(uri).cloned()?;
        let table = db.lock().get(name).cloned();
        table
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
        if let Some(limit) = *self.fail_after.lock() {
            if self.connects.load(Ordering::SeqCst) >= limit {
                return Err(StoreError::Connect(format!(
                    "refusing connection to {uri}"
                )));
            }
        }
        let tables = self
            .databases
            .lock()
            .entry(uri.to_string())
            .or_default()
            .clone();
        let id = self.connects.fetch_add(1, Ordering::SeqCst);
        debug!("Opened memory connection {} to {}", id, uri);
        Ok(Arc::new(MemoryConnection {
            id,
            tables,
            closed: AtomicBool::new(false),
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// A connection to an in-memory database.
pub struct MemoryConnection {
    id: usize,
    tables: Tables,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn open_table(&self, name: &str) -> Result<Arc<dyn StoreTable>, StoreError> {
        self.ensure_open()?;
        let table = self.tables.lock().get(name).cloned();
        match table {
            Some(t) => Ok(t),
            None => Err(StoreError::TableNotFound(name.to_string())),
        }
    }

    async fn create_table(
        &self,
        name: &str,
        schema: SchemaRef,
    ) -> Result<Arc<dyn StoreTable>, StoreError> {
        self.ensure_open()?;
        let dim = schema::embedding_dim(&schema).ok_or_else(|| {
            StoreError::Schema(format!("table {name} has no fixed-size embedding column"))
        })?;
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(StoreError::TableAlreadyExists(name.to_string()));
        }
        let table = Arc::new(MemoryTable::new(name, dim));
        tables.insert(name.to_string(), Arc::clone(&table));
        debug!("Created memory table {} (dimension: {})", name, dim);
        Ok(table)
    }

    async fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            debug!("Closed memory connection {}", self.id);
        }
        Ok(())
    }
}

/// An in-memory table.
pub struct MemoryTable {
    name: String,
    dimension: usize,
    rows: RwLock<Vec<Document>>,
    index: Mutex<Option<IndexConfig>>,
    index_builds: AtomicUsize,
    add_calls: AtomicUsize,
    failing_index_builds: AtomicUsize,
    failing_adds: AtomicUsize,
}

impl MemoryTable {
    fn new(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            rows: RwLock::new(Vec::new()),
            index: Mutex::new(None),
            index_builds: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
            failing_index_builds: AtomicUsize::new(0),
            failing_adds: AtomicUsize::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Successful index builds so far.
    pub fn index_builds(&self) -> usize {
        self.index_builds.load(Ordering::SeqCst)
    }

    /// Config of the most recent successful index build.
    pub fn index_config(&self) -> Option<IndexConfig> {
        self.index.lock().clone()
    }

    /// Calls to `add`, including failed ones.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` index builds fail.
    pub fn fail_next_index_builds(&self, n: usize) {
        self.failing_index_builds.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` adds fail with a transient error.
    pub fn fail_next_adds(&self, n: usize) {
        self.failing_adds.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
        match metric {
            DistanceMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Dot => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }

    fn project(mut doc: Document, query: &VectorQuery) -> Document {
        if !query.selects(columns::TEXT) {
            doc.text.clear();
        }
        if !query.selects(columns::DOCUMENT_NAME) {
            doc.document_name.clear();
        }
        if !query.selects(columns::EMBEDDING) {
            doc.embedding.clear();
        }
        if !query.selects(columns::METADATA) {
            doc.metadata.clear();
        }
        doc
    }
}

fn parse_filter(predicate: Option<&str>) -> Result<Option<Predicate>, StoreError> {
    predicate.map(Predicate::parse).transpose()
}

#[async_trait]
impl StoreTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, rows: Vec<Document>, mode: AddMode) -> Result<(), StoreError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_adds) {
            return Err(StoreError::Insert("temporary write conflict".to_string()));
        }
        if let Some(bad) = rows.iter().find(|d| d.embedding.len() != self.dimension) {
            return Err(StoreError::Schema(format!(
                "row {}: embedding dimension mismatch: expected {}, got {}",
                bad.id,
                self.dimension,
                bad.embedding.len()
            )));
        }

        let count = rows.len();
        let mut stored = self.rows.write().await;
        match mode {
            AddMode::Append => stored.extend(rows),
            AddMode::Overwrite => *stored = rows,
        }
        debug!("Added {} rows to {}", count, self.name);
        Ok(())
    }

    async fn delete(&self, predicate: &str) -> Result<(), StoreError> {
        let filter = Predicate::parse(predicate)?;
        let mut stored = self.rows.write().await;
        let before = stored.len();
        stored.retain(|doc| !filter.matches(doc));
        debug!("Deleted {} rows from {}", before - stored.len(), self.name);
        Ok(())
    }

    async fn create_index(&self, column: &str, config: &IndexConfig) -> Result<(), StoreError> {
        if column != columns::EMBEDDING {
            return Err(StoreError::Index(format!(
                "column {column} is not a vector column"
            )));
        }
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        if Self::take_failure(&self.failing_index_builds) {
            return Err(StoreError::Index("index training interrupted".to_string()));
        }
        {
            let mut index = self.index.lock();
            if index.is_some() && !config.replace {
                return Err(StoreError::Index(format!(
                    "index on {column} already exists and replace is false"
                )));
            }
            *index = Some(config.clone());
        }
        self.index_builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<QueryRow>, StoreError> {
        let filter = parse_filter(query.filter.as_deref())?;
        let stored = self.rows.read().await;
        let matching = stored
            .iter()
            .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)));

        let mut rows: Vec<QueryRow> = match &query.vector {
            Some(vector) => {
                if vector.len() != self.dimension {
                    return Err(StoreError::Query(format!(
                        "query vector dimension mismatch: expected {}, got {}",
                        self.dimension,
                        vector.len()
                    )));
                }
                let metric = query
                    .distance_type
                    .or_else(|| self.index.lock().as_ref().map(|c| c.metric))
                    .unwrap_or_default();
                let mut scored: Vec<QueryRow> = matching
                    .map(|doc| QueryRow {
                        distance: Some(Self::distance(metric, vector, &doc.embedding)),
                        document: doc.clone(),
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.document.id.cmp(&b.document.id))
                });
                scored
            }
            None => matching
                .map(|doc| QueryRow {
                    document: doc.clone(),
                    distance: None,
                })
                .collect(),
        };

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows
            .into_iter()
            .map(|row| QueryRow {
                document: Self::project(row.document, &query),
                distance: row.distance,
            })
            .collect())
    }

    async fn count_rows(&self, predicate: Option<&str>) -> Result<u64, StoreError> {
        let filter = parse_filter(predicate)?;
        let stored = self.rows.read().await;
        let n = match filter {
            Some(f) => stored.iter().filter(|d| f.matches(d)).count(),
            None => stored.len(),
        };
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::MATCH_ALL;

    const URI: &str = "memory://test";

    async fn table_with(dim: usize, docs: Vec<Document>) -> (MemoryConnector, Arc<dyn StoreTable>) {
        let connector = MemoryConnector::new();
        let conn = connector.connect(URI).await.unwrap();
        let table = conn
            .create_table("t", Arc::new(schema::documents_schema(dim)))
            .await
            .unwrap();
        if !docs.is_empty() {
            table.add(docs, AddMode::Append).await.unwrap();
        }
        (connector, table)
    }

    fn doc(id: &str, embedding: Vec<f32>) -> Document {
        Document::new(id, format!("text {id}"), "n", embedding)
    }

    #[tokio::test]
    async fn test_connections_share_tables() {
        let connector = MemoryConnector::new();
        let a = connector.connect(URI).await.unwrap();
        let b = connector.connect(URI).await.unwrap();
        a.create_table("t", Arc::new(schema::documents_schema(2)))
            .await
            .unwrap();
        assert!(b.open_table("t").await.is_ok());
        assert_eq!(b.table_names().await.unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let connector = MemoryConnector::new();
        let conn = connector.connect(URI).await.unwrap();
        let schema = Arc::new(schema::documents_schema(2));
        conn.create_table("t", Arc::clone(&schema)).await.unwrap();
        let err = conn.create_table("t", schema).await.err().unwrap();
        assert!(matches!(err, StoreError::TableAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_open_missing_table() {
        let connector = MemoryConnector::new();
        let conn = connector.connect(URI).await.unwrap();
        let err = conn.open_table("missing").await.err().unwrap();
        assert!(matches!(err, StoreError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let connector = MemoryConnector::new();
        let conn = connector.connect(URI).await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(
            conn.table_names().await,
            Err(StoreError::ConnectionClosed)
        ));
        assert_eq!(connector.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let connector = MemoryConnector::new();
        connector.fail_connects_after(Some(1));
        assert!(connector.connect(URI).await.is_ok());
        assert!(connector.connect(URI).await.is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_dimension() {
        let (_c, table) = table_with(3, vec![]).await;
        let err = table
            .add(vec![doc("a", vec![1.0])], AddMode::Append)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert_eq!(table.count_rows(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vector_query_orders_by_distance() {
        let (_c, table) = table_with(
            3,
            vec![
                doc("far", vec![0.0, 0.0, 1.0]),
                doc("near", vec![1.0, 0.0, 0.0]),
                doc("mid", vec![1.0, 1.0, 0.0]),
            ],
        )
        .await;

        let rows = table
            .query(VectorQuery::new().nearest_to(vec![1.0, 0.0, 0.0]).limit(2))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(rows[0].distance.unwrap().abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_equal_distances_break_by_id() {
        let (_c, table) = table_with(
            2,
            vec![doc("b", vec![1.0, 0.0]), doc("a", vec![1.0, 0.0])],
        )
        .await;
        let rows = table
            .query(VectorQuery::new().nearest_to(vec![1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(rows[0].document.id, "a");
    }

    #[tokio::test]
    async fn test_l2_and_dot_metrics() {
        assert!((MemoryTable::distance(DistanceMetric::L2, &[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-6);
        assert!((MemoryTable::distance(DistanceMetric::Dot, &[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-6);
        assert!((MemoryTable::distance(DistanceMetric::Cosine, &[0.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_filtered_scan_and_projection() {
        let mut a = doc("a", vec![1.0, 0.0]);
        a.document_name = "keep".into();
        let (_c, table) = table_with(2, vec![a, doc("b", vec![0.0, 1.0])]).await;

        let rows = table
            .query(
                VectorQuery::new()
                    .only_if("document_name = 'keep'")
                    .select(&[columns::ID, columns::DOCUMENT_NAME]),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document.id, "a");
        assert!(rows[0].document.text.is_empty());
        assert!(rows[0].document.embedding.is_empty());
        assert_eq!(rows[0].distance, None);
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let (_c, table) = table_with(
            2,
            vec![doc("a", vec![1.0, 0.0]), doc("b", vec![0.0, 1.0])],
        )
        .await;
        table.delete("id = 'a'").await.unwrap();
        assert_eq!(table.count_rows(None).await.unwrap(), 1);
        table.delete(MATCH_ALL).await.unwrap();
        assert_eq!(table.count_rows(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_rows() {
        let (_c, table) = table_with(2, vec![doc("a", vec![1.0, 0.0])]).await;
        table
            .add(vec![doc("z", vec![0.0, 1.0])], AddMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(table.count_rows(Some("id = 'a'")).await.unwrap(), 0);
        assert_eq!(table.count_rows(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_build_counting_and_failures() {
        let (connector, table) = table_with(2, vec![]).await;
        let inner = connector.table(URI, "t").unwrap();

        inner.fail_next_index_builds(1);
        assert!(table.create_index("embedding", &IndexConfig::default()).await.is_err());
        assert_eq!(inner.index_builds(), 0);

        table.create_index("embedding", &IndexConfig::default()).await.unwrap();
        assert_eq!(inner.index_builds(), 1);
        assert_eq!(inner.index_config(), Some(IndexConfig::default()));

        assert!(table.create_index("text", &IndexConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_failure_injection() {
        let (connector, table) = table_with(2, vec![]).await;
        let inner = connector.table(URI, "t").unwrap();
        inner.fail_next_adds(2);
        assert!(table.add(vec![doc("a", vec![1.0, 0.0])], AddMode::Append).await.is_err());
        assert!(table.add(vec![doc("a", vec![1.0, 0.0])], AddMode::Append).await.is_err());
        assert!(table.add(vec![doc("a", vec![1.0, 0.0])], AddMode::Append).await.is_ok());
        assert_eq!(inner.add_calls(), 3);
    }
}
