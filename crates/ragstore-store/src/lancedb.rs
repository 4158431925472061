//! `LanceDB` backend.
//!
//! Maps the storage traits onto `lancedb` connections and tables. Documents
//! travel as Arrow record batches shaped by [`documents_schema`].

use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    RecordBatchReader, StringArray,
};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::vector::{IvfFlatIndexBuilder, IvfHnswSqIndexBuilder, IvfPqIndexBuilder};
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::AddDataMode;
use lancedb::{connect, Connection, DistanceType, Table};
use ragstore_core::{
    columns, decode_metadata, AddMode, DistanceMetric, Document, IndexConfig, IndexType, QueryRow,
    StoreConnection, StoreConnector, StoreError, StoreTable, VectorQuery,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::schema::{documents_schema, embedding_dim};

/// Connector for `LanceDB` databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanceConnector;

#[async_trait]
impl StoreConnector for LanceConnector {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
        let conn = connect(uri)
            .execute()
            .await
            .map_err(|e| StoreError::Connect(format!("Failed to connect to LanceDB: {e}")))?;
        info!("Connected to LanceDB at {}", uri);
        Ok(Arc::new(LanceConnection {
            conn,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A `LanceDB` connection.
pub struct LanceConnection {
    conn: Connection,
    closed: AtomicBool,
}

impl LanceConnection {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for LanceConnection {
    async fn open_table(&self, name: &str) -> Result<Arc<dyn StoreTable>, StoreError> {
        self.ensure_open()?;
        let table = self
            .conn
            .open_table(name)
            .execute()
            .await
            .map_err(|e| match e {
                lancedb::Error::TableNotFound { .. } => StoreError::TableNotFound(name.to_string()),
                other => StoreError::Query(format!("Failed to open table {name}: {other}")),
            })?;
        LanceTable::new(table).await.map(|t| Arc::new(t) as Arc<dyn StoreTable>)
    }

    async fn create_table(
        &self,
        name: &str,
        schema: SchemaRef,
    ) -> Result<Arc<dyn StoreTable>, StoreError> {
        self.ensure_open()?;
        let table = self
            .conn
            .create_empty_table(name, schema)
            .execute()
            .await
            .map_err(|e| match e {
                lancedb::Error::TableAlreadyExists { .. } => {
                    StoreError::TableAlreadyExists(name.to_string())
                }
                other => StoreError::Schema(format!("Failed to create table {name}: {other}")),
            })?;
        info!("Created table {}", name);
        LanceTable::new(table).await.map(|t| Arc::new(t) as Arc<dyn StoreTable>)
    }

    async fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        self.conn
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to list tables: {e}")))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A `LanceDB` table of documents.
pub struct LanceTable {
    name: String,
    table: Table,
    dimension: usize,
}

impl LanceTable {
    async fn new(table: Table) -> Result<Self, StoreError> {
        let schema = table
            .schema()
            .await
            .map_err(|e| StoreError::Schema(format!("Failed to read schema: {e}")))?;
        let dimension = embedding_dim(&schema).ok_or_else(|| {
            StoreError::Schema(format!(
                "table {} has no fixed-size embedding column",
                table.name()
            ))
        })?;
        Ok(Self {
            name: table.name().to_string(),
            table,
            dimension,
        })
    }

    fn documents_to_batch(&self, docs: &[Document]) -> Result<RecordBatch, StoreError> {
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        let names: Vec<&str> = docs.iter().map(|d| d.document_name.as_str()).collect();
        let metadata = docs
            .iter()
            .map(Document::metadata_json)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Insert(format!("Failed to encode metadata: {e}")))?;

        let mut builder = FixedSizeListBuilder::new(Float32Builder::new(), self.dimension as i32);
        for doc in docs {
            if doc.embedding.len() != self.dimension {
                return Err(StoreError::Schema(format!(
                    "row {}: embedding dimension mismatch: expected {}, got {}",
                    doc.id,
                    self.dimension,
                    doc.embedding.len()
                )));
            }
            builder.values().append_slice(&doc.embedding);
            builder.append(true);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(names)),
            Arc::new(builder.finish()),
            Arc::new(StringArray::from(metadata)),
        ];
        RecordBatch::try_new(Arc::new(documents_schema(self.dimension)), columns)
            .map_err(|e| StoreError::Insert(format!("Failed to build record batch: {e}")))
    }
}

fn distance_type(metric: DistanceMetric) -> DistanceType {
    match metric {
        DistanceMetric::Cosine => DistanceType::Cosine,
        DistanceMetric::L2 => DistanceType::L2,
        DistanceMetric::Dot => DistanceType::Dot,
    }
}

fn build_index(config: &IndexConfig) -> Index {
    let metric = distance_type(config.metric);
    match config.index_type {
        IndexType::IvfPq => {
            let mut b = IvfPqIndexBuilder::default().distance_type(metric);
            if let Some(n) = config.num_partitions {
                b = b.num_partitions(n);
            }
            if let Some(n) = config.num_sub_vectors {
                b = b.num_sub_vectors(n);
            }
            Index::IvfPq(b)
        }
        IndexType::IvfFlat => {
            let mut b = IvfFlatIndexBuilder::default().distance_type(metric);
            if let Some(n) = config.num_partitions {
                b = b.num_partitions(n);
            }
            Index::IvfFlat(b)
        }
        IndexType::IvfHnswSq => {
            let mut b = IvfHnswSqIndexBuilder::default().distance_type(metric);
            if let Some(n) = config.num_partitions {
                b = b.num_partitions(n);
            }
            Index::IvfHnswSq(b)
        }
    }
}

#[async_trait]
impl StoreTable for LanceTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, rows: Vec<Document>, mode: AddMode) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let batch = self.documents_to_batch(&rows)?;
        let schema = batch.schema();
        let reader: Box<dyn RecordBatchReader + Send> =
            Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema));
        let mode = match mode {
            AddMode::Append => AddDataMode::Append,
            AddMode::Overwrite => AddDataMode::Overwrite,
        };
        self.table
            .add(reader)
            .mode(mode)
            .execute()
            .await
            .map_err(|e| StoreError::Insert(format!("Failed to insert rows: {e}")))?;
        debug!("Inserted {} rows into {}", rows.len(), self.name);
        Ok(())
    }

    async fn delete(&self, predicate: &str) -> Result<(), StoreError> {
        self.table
            .delete(predicate)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Delete(format!("Failed to delete rows: {e}")))
    }

    async fn create_index(&self, column: &str, config: &IndexConfig) -> Result<(), StoreError> {
        self.table
            .create_index(&[column], build_index(config))
            .replace(config.replace)
            .execute()
            .await
            .map_err(|e| StoreError::Index(format!("Failed to create index on {column}: {e}")))
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<QueryRow>, StoreError> {
        let select = query
            .select
            .as_ref()
            .map(|cols| Select::columns(cols.as_slice()));
        let mut stream = match &query.vector {
            Some(vector) => {
                let mut q = self
                    .table
                    .query()
                    .nearest_to(vector.clone())
                    .map_err(|e| StoreError::Query(format!("Failed to create search query: {e}")))?;
                if let Some(metric) = query.distance_type {
                    q = q.distance_type(distance_type(metric));
                }
                if let Some(filter) = &query.filter {
                    q = q.only_if(filter.clone());
                }
                if let Some(limit) = query.limit {
                    q = q.limit(limit);
                }
                if let Some(select) = select {
                    q = q.select(select);
                }
                q.execute().await
            }
            None => {
                let mut q = self.table.query();
                if let Some(filter) = &query.filter {
                    q = q.only_if(filter.clone());
                }
                if let Some(limit) = query.limit {
                    q = q.limit(limit);
                }
                if let Some(select) = select {
                    q = q.select(select);
                }
                q.execute().await
            }
        }
        .map_err(|e| StoreError::Query(format!("Failed to execute query: {e}")))?;

        let mut rows = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to fetch results: {e}")))?
        {
            rows.extend(batch_to_rows(&batch)?);
        }
        Ok(rows)
    }

    async fn count_rows(&self, predicate: Option<&str>) -> Result<u64, StoreError> {
        self.table
            .count_rows(predicate.map(str::to_string))
            .await
            .map(|n| n as u64)
            .map_err(|e| StoreError::Query(format!("Failed to count rows: {e}")))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

fn string_at(array: Option<&StringArray>, i: usize) -> String {
    array
        .filter(|a| !a.is_null(i))
        .map(|a| a.value(i).to_string())
        .unwrap_or_default()
}

/// Convert a result batch into rows. Columns left out of the projection
/// come back empty.
fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<QueryRow>, StoreError> {
    let ids = string_column(batch, columns::ID);
    let texts = string_column(batch, columns::TEXT);
    let names = string_column(batch, columns::DOCUMENT_NAME);
    let metadata = string_column(batch, columns::METADATA);
    let embeddings = batch
        .column_by_name(columns::EMBEDDING)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
    let distances = batch
        .column_by_name(columns::DISTANCE)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let embedding = embeddings
            .filter(|e| !e.is_null(i))
            .and_then(|e| {
                e.value(i)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|arr| arr.values().to_vec())
            })
            .unwrap_or_default();
        let metadata = decode_metadata(&string_at(metadata, i))
            .map_err(|e| StoreError::Query(format!("Failed to decode metadata: {e}")))?;

        rows.push(QueryRow {
            document: Document {
                id: string_at(ids, i),
                text: string_at(texts, i),
                document_name: string_at(names, i),
                embedding,
                metadata,
            },
            distance: distances.filter(|d| !d.is_null(i)).map(|d| d.value(i)),
        });
    }
    Ok(rows)
}
