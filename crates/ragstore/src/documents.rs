//! Document writes, counts and listings.

use crate::progress::{ProgressCallback, ProgressTracker};
use crate::retry::retry_with_backoff;
use crate::store::RagStore;
use crate::tenant::validate_tenant_id;
use ragstore_core::{
    columns, AddMode, Document, DocumentNamePage, EmbedError, EmbeddingProvider, Error,
    OperationTimer, Result, StoreTable, VectorQuery,
};
use ragstore_store::predicate::{eq_predicate, ids_predicate, MATCH_ALL};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Texts embedded per provider call in
/// [`RagStore::add_documents_with_embedding`].
pub const EMBED_BATCH_SIZE: usize = 100;

/// Default page size for [`RagStore::list_document_names_paginated`].
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Names returned by [`RagStore::list_document_names`].
pub const MAX_LISTED_NAMES: usize = 10_000;

impl RagStore {
    /// Append documents to the tenant's table, creating it on first use.
    pub async fn add_documents(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        self.add_documents_with_progress(cancel, tenant, docs, None)
            .await
    }

    /// [`add_documents`](Self::add_documents) reporting through `callback`.
    ///
    /// Stages: "inserting", then "indexing".
    pub async fn add_documents_with_progress(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: Vec<Document>,
        callback: Option<ProgressCallback>,
    ) -> Result<()> {
        let timer = OperationTimer::start(self.metrics.as_ref(), "add_documents");
        let count = docs.len();
        let result = self.write_documents(cancel, tenant, docs, callback, false).await;
        if result.is_ok() {
            self.metrics.record_document_count("add_documents", count);
        }
        finish(timer, result)
    }

    /// Replace documents that share an id with an incoming one, insert the rest.
    pub async fn upsert_documents(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: Vec<Document>,
    ) -> Result<()> {
        self.upsert_documents_with_progress(cancel, tenant, docs, None)
            .await
    }

    /// [`upsert_documents`](Self::upsert_documents) reporting through
    /// `callback`.
    ///
    /// Stages: "deleting", "inserting", then "indexing".
    pub async fn upsert_documents_with_progress(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: Vec<Document>,
        callback: Option<ProgressCallback>,
    ) -> Result<()> {
        let timer = OperationTimer::start(self.metrics.as_ref(), "upsert_documents");
        let count = docs.len();
        let result = self.write_documents(cancel, tenant, docs, callback, true).await;
        if result.is_ok() {
            self.metrics.record_document_count("upsert_documents", count);
        }
        finish(timer, result)
    }

    async fn write_documents(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: Vec<Document>,
        callback: Option<ProgressCallback>,
        upsert: bool,
    ) -> Result<()> {
        if docs.is_empty() {
            return Err(Error::validation(if upsert {
                "no documents to upsert"
            } else {
                "no documents to add"
            }));
        }
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;
        self.validate_embeddings(&docs)?;

        let tracker = callback.map(|cb| {
            let first = if upsert { "deleting" } else { "inserting" };
            ProgressTracker::new(first, docs.len() as u64, Some(cb))
        });

        let lock = self.locks.lock_for(tenant).await;
        let _guard = lock.lock().await;

        let table = self.tables.get_or_create_table(tenant).await?;

        if upsert {
            let ids: Vec<&str> = docs
                .iter()
                .map(|d| d.id.as_str())
                .filter(|id| !id.is_empty())
                .collect();
            if let Some(predicate) = ids_predicate(&ids) {
                if let Err(e) = table.delete(&predicate).await {
                    warn!(
                        "Ignoring delete failure before upsert for tenant {}: {}",
                        tenant, e
                    );
                }
            }
            if let Some(t) = &tracker {
                t.set_stage("inserting");
            }
        }

        self.insert_batches(cancel, table.as_ref(), &docs, tracker.as_ref())
            .await?;

        if let Some(t) = &tracker {
            t.set_stage("indexing");
        }
        self.indexes.ensure_index(table.as_ref(), tenant).await?;

        if let Some(t) = &tracker {
            t.complete();
        }
        debug!("Wrote {} documents for tenant {}", docs.len(), tenant);
        Ok(())
    }

    /// Insert `docs` in chunks of `max_batch_size`, checking for
    /// cancellation before each chunk.
    async fn insert_batches(
        &self,
        cancel: &CancellationToken,
        table: &dyn StoreTable,
        docs: &[Document],
        tracker: Option<&ProgressTracker>,
    ) -> Result<()> {
        for (i, batch) in docs.chunks(self.max_batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let start = i * self.max_batch_size;
            debug!(
                "Inserting batch [{}:{}] into {}",
                start,
                start + batch.len(),
                table.name()
            );
            self.insert_batch(cancel, table, batch).await?;
            if let Some(t) = tracker {
                t.add(batch.len() as u64);
            }
        }
        Ok(())
    }

    async fn insert_batch(
        &self,
        cancel: &CancellationToken,
        table: &dyn StoreTable,
        batch: &[Document],
    ) -> Result<()> {
        match &self.retry {
            Some(policy) => {
                retry_with_backoff(cancel, policy, || {
                    let rows = batch.to_vec();
                    async move { table.add(rows, AddMode::Append).await.map_err(Error::from) }
                })
                .await
            }
            None => Ok(table.add(batch.to_vec(), AddMode::Append).await?),
        }
    }

    fn validate_embeddings(&self, docs: &[Document]) -> Result<()> {
        for (i, doc) in docs.iter().enumerate() {
            if doc.embedding.len() != self.embedding_dim {
                return Err(Error::validation(format!(
                    "document {i}: embedding dimension mismatch: expected {}, got {}",
                    self.embedding_dim,
                    doc.embedding.len()
                )));
            }
        }
        Ok(())
    }

    /// Replace the document with `doc.id` in an existing table.
    pub async fn update_document(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        doc: Document,
    ) -> Result<()> {
        if doc.id.is_empty() {
            return Err(Error::validation("document id cannot be empty"));
        }
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;
        if doc.embedding.len() != self.embedding_dim {
            return Err(Error::validation(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                doc.embedding.len()
            )));
        }

        let lock = self.locks.lock_for(tenant).await;
        let _guard = lock.lock().await;

        let table = self
            .tables
            .open_table(tenant)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no table for tenant {tenant}")))?;

        table.delete(&eq_predicate(columns::ID, &doc.id)).await?;
        self.insert_batch(cancel, table.as_ref(), std::slice::from_ref(&doc))
            .await
    }

    /// Delete every chunk of `document_name`. A missing table is a no-op.
    pub async fn delete_by_document_name(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        document_name: &str,
    ) -> Result<()> {
        if document_name.is_empty() {
            return Err(Error::validation("document name cannot be empty"));
        }
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;

        let lock = self.locks.lock_for(tenant).await;
        let _guard = lock.lock().await;

        let Some(table) = self.tables.open_table(tenant).await? else {
            return Ok(());
        };
        table
            .delete(&eq_predicate(columns::DOCUMENT_NAME, document_name))
            .await?;
        info!("Deleted document {:?} for tenant {}", document_name, tenant);
        Ok(())
    }

    /// Delete every row but keep the table. The index is rebuilt on the
    /// next write.
    pub async fn clear_user_data(&self, cancel: &CancellationToken, tenant: &str) -> Result<()> {
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;
        if !self.tables.table_exists(tenant).await? {
            return Ok(());
        }

        let lock = self.locks.lock_for(tenant).await;
        let _guard = lock.lock().await;

        let Some(table) = self.tables.open_table(tenant).await? else {
            return Ok(());
        };
        table.delete(MATCH_ALL).await?;
        self.indexes.forget(tenant).await;
        info!("Cleared all documents for tenant {}", tenant);
        Ok(())
    }

    /// Row count, 0 when the tenant has no table.
    pub async fn count_documents(&self, cancel: &CancellationToken, tenant: &str) -> Result<u64> {
        self.begin(cancel)?;
        match self.tables.open_table(tenant).await? {
            Some(table) => Ok(table.count_rows(None).await?),
            None => Ok(0),
        }
    }

    /// One page of the tenant's distinct document names, sorted ascending.
    ///
    /// A `limit` of 0 means [`DEFAULT_PAGE_SIZE`]. `total_count` is the
    /// number of distinct names.
    pub async fn list_document_names_paginated(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        offset: usize,
        limit: usize,
    ) -> Result<DocumentNamePage> {
        self.begin(cancel)?;
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };

        let Some(table) = self.tables.open_table(tenant).await? else {
            return Ok(DocumentNamePage {
                names: Vec::new(),
                total_count: 0,
                offset,
                limit,
                has_more: false,
            });
        };

        let rows = table
            .query(VectorQuery::new().select(&[columns::ID, columns::DOCUMENT_NAME]))
            .await?;
        let all: BTreeSet<String> = rows
            .into_iter()
            .map(|r| r.document.document_name)
            .collect();

        let total_count = all.len();
        let names: Vec<String> = all.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(names.len()) < total_count;

        Ok(DocumentNamePage {
            names,
            total_count,
            offset,
            limit,
            has_more,
        })
    }

    /// Up to [`MAX_LISTED_NAMES`] distinct document names, sorted ascending.
    pub async fn list_document_names(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
    ) -> Result<Vec<String>> {
        let page = self
            .list_document_names_paginated(cancel, tenant, 0, MAX_LISTED_NAMES)
            .await?;
        Ok(page.names)
    }

    /// Embed `texts` with `provider` and add them as documents.
    ///
    /// `texts[i]` belongs to `document_names[i]` and gets id
    /// `<document_name>_<i>`.
    pub async fn add_documents_with_embedding(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        texts: &[String],
        document_names: &[String],
        provider: &dyn EmbeddingProvider,
    ) -> Result<()> {
        if texts.is_empty() {
            return Err(Error::validation("no texts to add"));
        }
        if texts.len() != document_names.len() {
            return Err(Error::validation(format!(
                "number of document names ({}) must match number of texts ({})",
                document_names.len(),
                texts.len()
            )));
        }
        if provider.dimensions() != self.embedding_dim {
            return Err(Error::validation(format!(
                "provider embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                provider.dimensions()
            )));
        }

        let mut docs = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(EMBED_BATCH_SIZE).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let start = batch_no * EMBED_BATCH_SIZE;
            let embeddings = provider.generate_embeddings(cancel, batch).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    got: embeddings.len(),
                }
                .into());
            }
            for (j, embedding) in embeddings.into_iter().enumerate() {
                let idx = start + j;
                let name = &document_names[idx];
                docs.push(Document::new(
                    format!("{name}_{idx}"),
                    texts[idx].clone(),
                    name.clone(),
                    embedding,
                ));
            }
        }

        self.add_documents(cancel, tenant, docs).await
    }
}

/// Report `result` on `timer`, classifying failures by error kind.
pub(crate) fn finish<T>(timer: OperationTimer<'_>, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => timer.success(),
        Err(e) => timer.failure(e.kind()),
    }
    result
}
