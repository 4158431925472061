//! Vector and hybrid search over a tenant's documents.
//!
//! Reads never take the tenant write lock. They may observe rows that a
//! concurrent writer is still appending.

use crate::documents::finish;
use crate::hybrid::{apply_keyword_floor, candidate_limit, fuse, rank_keyword, HybridSearchOptions};
use crate::rerank::Reranker;
use crate::store::RagStore;
use crate::tenant::validate_tenant_id;
use ragstore_core::{
    columns, DistanceMetric, EmbeddingProvider, Error, HybridSearchResult, OperationTimer,
    Result, SearchLeg, SearchResult, StoreTable, VectorQuery,
};
use ragstore_store::{build_predicate, Filters, FilterValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Columns every search projects.
const RESULT_COLUMNS: &[&str] = &[
    columns::ID,
    columns::TEXT,
    columns::DOCUMENT_NAME,
    columns::EMBEDDING,
    columns::METADATA,
];

/// Options for [`RagStore::search`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Maximum results; 0 means the store's default limit
    pub limit: usize,
    /// Equality filters on whitelisted columns
    pub filters: Filters,
    /// Overrides the metric of the tenant's index
    pub distance: Option<DistanceMetric>,
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_distance(mut self, metric: DistanceMetric) -> Self {
        self.distance = Some(metric);
        self
    }
}

impl RagStore {
    /// Nearest-neighbour search. `score` is the backend distance, lower is
    /// closer. A tenant without a table has no results.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let timer = OperationTimer::start(self.metrics.as_ref(), "search");
        let result = self
            .vector_search(cancel, tenant, query_embedding, options)
            .await;
        if let Ok(results) = &result {
            self.metrics.record_search_results(results.len());
        }
        finish(timer, result)
    }

    async fn vector_search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;
        self.check_query_dimension(query_embedding)?;
        let predicate = build_predicate(&options.filters)?;
        let limit = if options.limit == 0 {
            self.default_limit
        } else {
            options.limit
        };

        let Some(table) = self.tables.open_table(tenant).await? else {
            debug!("No table for tenant {}, empty search result", tenant);
            return Ok(Vec::new());
        };
        let metric = match options.distance {
            Some(metric) => metric,
            None => self.indexes.index_config(tenant).metric,
        };

        self.nearest(
            table.as_ref(),
            query_embedding,
            metric,
            predicate.as_deref(),
            limit,
        )
        .await
    }

    async fn nearest(
        &self,
        table: &dyn StoreTable,
        query_embedding: &[f32],
        metric: DistanceMetric,
        predicate: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let mut query = VectorQuery::new()
            .nearest_to(query_embedding.to_vec())
            .distance_type(metric)
            .limit(limit)
            .select(RESULT_COLUMNS);
        if let Some(p) = predicate {
            query = query.only_if(p);
        }
        let rows = table.query(query).await?;
        Ok(rows.into_iter().map(SearchResult::from).collect())
    }

    fn check_query_dimension(&self, query_embedding: &[f32]) -> Result<()> {
        if query_embedding.len() != self.embedding_dim {
            return Err(Error::validation(format!(
                "query embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                query_embedding.len()
            )));
        }
        Ok(())
    }

    /// [`search`](Self::search) restricted to one source document.
    pub async fn search_by_document(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_embedding: &[f32],
        document_name: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if document_name.is_empty() {
            return Err(Error::validation("document name cannot be empty"));
        }
        let options = SearchOptions::new(limit).with_filter(columns::DOCUMENT_NAME, document_name);
        self.search(cancel, tenant, query_embedding, &options).await
    }

    /// Embed `query` with `provider`, then [`search`](Self::search).
    pub async fn search_with_text(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query: &str,
        provider: &dyn EmbeddingProvider,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.begin(cancel)?;
        let embedding = embed_query(cancel, provider, query).await?;
        self.search(cancel, tenant, &embedding, options).await
    }

    /// [`search`](Self::search), then reorder the hits with `reranker`.
    pub async fn search_with_rerank(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query: &str,
        query_embedding: &[f32],
        reranker: &dyn Reranker,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let results = self
            .search(cancel, tenant, query_embedding, options)
            .await?;
        if results.is_empty() {
            return Ok(results);
        }
        reranker.rerank(cancel, query, results).await
    }

    /// Fuse nearest-neighbour similarity with BM25 keyword relevance.
    ///
    /// Weights are validated before anything runs. A leg whose normalized
    /// weight is zero is skipped, and `query_embedding` is only checked when
    /// the vector leg runs. The keyword leg scores every filtered row in
    /// memory, so it is refused once the table holds more rows than
    /// [`max_documents_for_bm25`](Self::max_documents_for_bm25).
    pub async fn hybrid_search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        query_embedding: &[f32],
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridSearchResult>> {
        let timer = OperationTimer::start(self.metrics.as_ref(), "hybrid_search");
        let result = self
            .run_hybrid(cancel, tenant, query_text, query_embedding, options)
            .await;
        if let Ok(results) = &result {
            self.metrics.record_search_results(results.len());
        }
        finish(timer, result)
    }

    async fn run_hybrid(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        query_embedding: &[f32],
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridSearchResult>> {
        let (vector_weight, keyword_weight) = options.normalized_weights()?;
        let keyword_floor = options.keyword_floor()?;
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;
        let run_vector = vector_weight > 0.0;
        let run_keyword = keyword_weight > 0.0;
        if run_vector {
            self.check_query_dimension(query_embedding)?;
        }
        let predicate = build_predicate(&options.filters)?;
        let limit = if options.limit == 0 {
            self.default_limit
        } else {
            options.limit
        };

        let Some(table) = self.tables.open_table(tenant).await? else {
            return Ok(Vec::new());
        };

        if run_keyword {
            self.check_keyword_scale(table.as_ref()).await?;
        }

        let candidates = candidate_limit(limit);
        let metric = self.indexes.index_config(tenant).metric;
        let table = table.as_ref();
        let predicate = predicate.as_deref();

        let vector_leg = async {
            if !run_vector {
                return Ok(Vec::new());
            }
            self.nearest(table, query_embedding, metric, predicate, candidates)
                .await
                .map_err(|e| Error::search_leg(SearchLeg::Vector, e))
        };
        let keyword_leg = async {
            if !run_keyword {
                return Ok(Vec::new());
            }
            keyword_candidates(table, query_text, predicate, candidates)
                .await
                .map_err(|e| Error::search_leg(SearchLeg::Keyword, e))
        };
        let (vector, mut keyword) = tokio::try_join!(vector_leg, keyword_leg)?;
        apply_keyword_floor(&mut keyword, keyword_floor);

        debug!(
            "Hybrid search for tenant {}: {} vector and {} keyword candidates",
            tenant,
            vector.len(),
            keyword.len()
        );
        Ok(fuse(vector, keyword, vector_weight, keyword_weight, limit))
    }

    async fn check_keyword_scale(&self, table: &dyn StoreTable) -> Result<()> {
        let max = self.max_documents_for_bm25();
        if max == 0 {
            return Ok(());
        }
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| Error::search_leg(SearchLeg::Keyword, e.into()))?;
        if count > max as u64 {
            return Err(Error::ResourceExhausted {
                message: format!("document count ({count}) exceeds BM25 limit ({max})"),
                hint: "raise search.max_documents_for_bm25 or use vector-only search \
                       (keyword_weight = 0)"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Embed `query_text` with `provider`, then
    /// [`hybrid_search`](Self::hybrid_search).
    ///
    /// No embedding is generated when the vector weight is zero.
    pub async fn hybrid_search_with_text(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        provider: &dyn EmbeddingProvider,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridSearchResult>> {
        let (vector_weight, _) = options.normalized_weights()?;
        self.begin(cancel)?;
        let embedding = if vector_weight > 0.0 {
            embed_query(cancel, provider, query_text).await?
        } else {
            Vec::new()
        };
        self.hybrid_search(cancel, tenant, query_text, &embedding, options)
            .await
    }
}

async fn embed_query(
    cancel: &CancellationToken,
    provider: &dyn EmbeddingProvider,
    query: &str,
) -> Result<Vec<f32>> {
    provider
        .generate_embedding(cancel, query)
        .await
        .map_err(|e| Error::search_leg(SearchLeg::Embedding, e.into()))
}

/// Every filtered row, ranked by BM25 against `query_text`.
async fn keyword_candidates(
    table: &dyn StoreTable,
    query_text: &str,
    predicate: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let mut query = VectorQuery::new().select(RESULT_COLUMNS);
    if let Some(p) = predicate {
        query = query.only_if(p);
    }
    let rows = table.query(query).await?;
    let docs: Vec<SearchResult> = rows.into_iter().map(SearchResult::from).collect();
    Ok(rank_keyword(docs, query_text, limit))
}
