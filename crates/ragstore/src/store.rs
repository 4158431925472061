//! The multi-tenant document store.
//!
//! [`RagStore`] ties the pieces together: tenant tables come from a
//! [`TenantTableRegistry`], writers are serialized per tenant through a
//! [`UserLockRegistry`], and the similarity index is built lazily by an
//! [`IndexManager`] after the first successful write.
//!
//! Locks are always taken in the same order: pool, tenant mutex, table
//! cache, index state.

use crate::config::Config;
use crate::index_manager::IndexManager;
use crate::locks::UserLockRegistry;
use crate::retry::RetryPolicy;
use crate::tenant::{tenant_of_table, validate_tenant_id, TenantTableRegistry};
use ragstore_core::{
    Error, IndexConfig, MetricsCollector, NoopMetrics, Result, StoreConnection, StoreConnector,
    StoreError,
};
use ragstore_store::ConnectionPool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tenant tables sampled by [`RagStore::health_check_with_details`].
pub const HEALTH_SAMPLE_TABLES: usize = 10;

/// Construction parameters for a [`RagStore`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Length of every stored embedding
    pub embedding_dim: usize,
    /// Rows per insert call
    pub max_batch_size: usize,
    /// Result limit used when a search asks for 0
    pub default_limit: usize,
    /// Row ceiling for hybrid keyword scoring (0 disables it)
    pub max_documents_for_bm25: usize,
    /// Retry schedule for batch inserts; `None` disables retries
    pub retry: Option<RetryPolicy>,
    pub metrics: Option<Arc<dyn MetricsCollector>>,
}

impl StoreOptions {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            max_batch_size: 1000,
            default_limit: 10,
            max_documents_for_bm25: 10_000,
            retry: Some(RetryPolicy::default()),
            metrics: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            embedding_dim: config.store.embedding_dim,
            max_batch_size: config.store.max_batch_size,
            default_limit: config.search.default_limit,
            max_documents_for_bm25: config.search.max_documents_for_bm25,
            retry: config.retry_policy(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::validation("embedding dimension must be positive, got 0"));
        }
        if self.max_batch_size == 0 {
            return Err(Error::validation("max batch size must be positive, got 0"));
        }
        Ok(())
    }
}

/// Result of [`RagStore::health_check_with_details`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub uri: String,
    pub tables_count: usize,
    pub error: Option<String>,
    /// Row counts for up to [`HEALTH_SAMPLE_TABLES`] tenants
    pub tenant_document_counts: BTreeMap<String, u64>,
}

/// Multi-tenant retrieval store.
pub struct RagStore {
    pub(crate) uri: String,
    pub(crate) embedding_dim: usize,
    pub(crate) max_batch_size: usize,
    pub(crate) default_limit: usize,
    pub(crate) max_documents_for_bm25: AtomicUsize,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) metrics: Arc<dyn MetricsCollector>,
    pub(crate) tables: TenantTableRegistry,
    pub(crate) indexes: IndexManager,
    pub(crate) locks: UserLockRegistry,
    /// Set when the connection was leased from a pool
    pool: Option<Arc<ConnectionPool>>,
    closed: AtomicBool,
}

impl RagStore {
    /// Connect to `uri` with a dedicated connection.
    pub async fn connect(
        connector: &dyn StoreConnector,
        uri: &str,
        options: StoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        let conn = connector.connect(uri).await?;
        info!("Connected to {} (embedding dim {})", uri, options.embedding_dim);
        Ok(Self::build(conn, uri, None, options))
    }

    /// Connect using the `[store]`, `[search]` and `[retry]` config sections.
    pub async fn open(connector: &dyn StoreConnector, config: &Config) -> Result<Self> {
        config.validate()?;
        Self::connect(connector, &config.store.uri, StoreOptions::from_config(config)).await
    }

    /// Lease one connection from `pool`. [`close`](Self::close) or dropping
    /// the store returns it.
    pub async fn with_pool(pool: Arc<ConnectionPool>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let conn = pool.get().await?;
        let uri = pool.uri().to_string();
        debug!("Leased pooled connection to {}", uri);
        Ok(Self::build(conn, &uri, Some(pool), options))
    }

    fn build(
        conn: Arc<dyn StoreConnection>,
        uri: &str,
        pool: Option<Arc<ConnectionPool>>,
        options: StoreOptions,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            embedding_dim: options.embedding_dim,
            max_batch_size: options.max_batch_size,
            default_limit: options.default_limit.max(1),
            max_documents_for_bm25: AtomicUsize::new(options.max_documents_for_bm25),
            retry: options.retry,
            metrics: options
                .metrics
                .unwrap_or_else(|| Arc::new(NoopMetrics)),
            tables: TenantTableRegistry::new(conn, options.embedding_dim),
            indexes: IndexManager::new(),
            locks: UserLockRegistry::new(),
            pool,
            closed: AtomicBool::new(false),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_documents_for_bm25(&self) -> usize {
        self.max_documents_for_bm25.load(Ordering::Relaxed)
    }

    /// Change the hybrid-search row ceiling. 0 disables the check.
    pub fn set_max_documents_for_bm25(&self, max: usize) {
        self.max_documents_for_bm25.store(max, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the connection. Idempotent.
    ///
    /// A pooled connection goes back to its pool; a dedicated one is closed.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.pool {
            Some(pool) => self.return_lease(pool)?,
            None => {
                self.tables.connection().close().await?;
                info!("Closed connection to {}", self.uri);
            }
        }
        Ok(())
    }

    fn return_lease(&self, pool: &ConnectionPool) -> Result<()> {
        match pool.put(Arc::clone(self.tables.connection())) {
            Ok(()) => debug!("Returned connection to pool for {}", self.uri),
            // The pool already closed every connection it owns.
            Err(StoreError::PoolClosed) => debug!("Pool for {} already closed", self.uri),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Fails if the caller cancelled or the store is closed.
    pub(crate) fn begin(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_closed() {
            return Err(StoreError::ConnectionClosed.into());
        }
        Ok(())
    }

    // ========================================================================
    // Index administration
    // ========================================================================

    /// Choose the index config for a tenant before its first write.
    pub async fn set_index_config(&self, tenant: &str, config: IndexConfig) -> Result<()> {
        validate_tenant_id(tenant)?;
        self.indexes.set_index_config(tenant, config).await
    }

    /// The tenant's index config, or the default.
    pub async fn index_config(&self, tenant: &str) -> Result<IndexConfig> {
        validate_tenant_id(tenant)?;
        Ok(self.indexes.index_config(tenant))
    }

    /// Replace the tenant's index with one built from `config`.
    ///
    /// Runs under the tenant's write lock, so no write interleaves with the
    /// rebuild. A tenant without a table is `NotFound`.
    pub async fn rebuild_index(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        config: IndexConfig,
    ) -> Result<()> {
        self.begin(cancel)?;
        validate_tenant_id(tenant)?;

        let lock = self.locks.lock_for(tenant).await;
        let _guard = lock.lock().await;

        let table = self
            .tables
            .open_table(tenant)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no table for tenant {tenant}")))?;

        info!("Rebuilding index for tenant {}", tenant);
        self.indexes.replace_config(tenant, config).await;
        self.indexes.ensure_index(table.as_ref(), tenant).await
    }

    pub async fn table_exists(&self, cancel: &CancellationToken, tenant: &str) -> Result<bool> {
        self.begin(cancel)?;
        self.tables.table_exists(tenant).await
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Cheap liveness probe: lists the backend's tables.
    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.begin(cancel)?;
        self.tables.connection().table_names().await?;
        Ok(())
    }

    /// Table count plus row counts for a sample of tenants. Never fails;
    /// problems are reported in the status.
    pub async fn health_check_with_details(&self, cancel: &CancellationToken) -> HealthStatus {
        let mut status = HealthStatus {
            healthy: true,
            uri: self.uri.clone(),
            ..HealthStatus::default()
        };

        if let Err(e) = self.begin(cancel) {
            status.healthy = false;
            status.error = Some(e.to_string());
            return status;
        }

        let conn = self.tables.connection();
        let names = match conn.table_names().await {
            Ok(names) => names,
            Err(e) => {
                status.healthy = false;
                status.error = Some(format!("failed to list tables: {e}"));
                return status;
            }
        };
        status.tables_count = names.len();

        for name in &names {
            if status.tenant_document_counts.len() >= HEALTH_SAMPLE_TABLES {
                break;
            }
            let Some(tenant) = tenant_of_table(name) else {
                continue;
            };
            let table = match conn.open_table(name).await {
                Ok(t) => t,
                Err(e) => {
                    warn!("Health check could not open {}: {}", name, e);
                    continue;
                }
            };
            match table.count_rows(None).await {
                Ok(n) => {
                    status.tenant_document_counts.insert(tenant.to_string(), n);
                }
                Err(e) => warn!("Health check could not count {}: {}", name, e),
            }
        }

        status
    }
}

/// A pooled store dropped without [`RagStore::close`] still hands its
/// connection back. A dedicated connection is released with its last handle.
impl Drop for RagStore {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = &self.pool {
            if let Err(e) = self.return_lease(pool) {
                warn!("Failed to return connection to pool for {}: {}", self.uri, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstore_core::{Document, IndexType};
    use ragstore_store::MemoryConnector;

    const URI: &str = "memory://store";

    async fn store(connector: &MemoryConnector) -> RagStore {
        RagStore::connect(connector, URI, StoreOptions::new(4))
            .await
            .unwrap()
    }

    fn doc(id: &str) -> Document {
        Document::new(id, "text", "doc.md", vec![1.0, 0.0, 0.0, 0.0])
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_options() {
        let connector = MemoryConnector::new();
        let zero_dim = RagStore::connect(&connector, URI, StoreOptions::new(0)).await;
        assert!(matches!(zero_dim, Err(Error::Validation(_))));

        let zero_batch = RagStore::connect(
            &connector,
            URI,
            StoreOptions::new(4).with_max_batch_size(0),
        )
        .await;
        assert!(matches!(zero_batch, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let connector = MemoryConnector::new();
        let config = Config::from_toml_str(
            "[store]\nuri = \"memory://cfg\"\nembedding_dim = 8\n\n[search]\nmax_documents_for_bm25 = 5",
        )
        .unwrap();
        let store = RagStore::open(&connector, &config).await.unwrap();
        assert_eq!(store.uri(), "memory://cfg");
        assert_eq!(store.embedding_dim(), 8);
        assert_eq!(store.max_documents_for_bm25(), 5);
        assert_eq!(store.retry, Some(RetryPolicy::default()));
    }

    #[tokio::test]
    async fn test_max_documents_for_bm25_accessors() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        assert_eq!(store.max_documents_for_bm25(), 10_000);
        store.set_max_documents_for_bm25(0);
        assert_eq!(store.max_documents_for_bm25(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_operations() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();

        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert_eq!(connector.stats().closes, 1);

        let err = store.health_check(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_health_checks() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();
        store.health_check(&cancel).await.unwrap();

        store
            .add_documents(&cancel, "alice", vec![doc("a"), doc("b")])
            .await
            .unwrap();
        store.add_documents(&cancel, "bob", vec![doc("c")]).await.unwrap();

        let status = store.health_check_with_details(&cancel).await;
        assert!(status.healthy);
        assert_eq!(status.uri, URI);
        assert_eq!(status.tables_count, 2);
        assert_eq!(status.tenant_document_counts.get("alice"), Some(&2));
        assert_eq!(status.tenant_document_counts.get("bob"), Some(&1));
    }

    #[tokio::test]
    async fn test_health_details_samples_at_most_ten_tenants() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();
        for i in 0..12 {
            store
                .add_documents(&cancel, &format!("t{i}"), vec![doc("x")])
                .await
                .unwrap();
        }
        let status = store.health_check_with_details(&cancel).await;
        assert_eq!(status.tables_count, 12);
        assert_eq!(status.tenant_document_counts.len(), HEALTH_SAMPLE_TABLES);
    }

    #[tokio::test]
    async fn test_health_details_reports_cancellation() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = store.health_check_with_details(&cancel).await;
        assert!(!status.healthy);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_set_index_config_then_first_write_uses_it() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();
        let cfg = IndexConfig {
            index_type: IndexType::IvfFlat,
            ..IndexConfig::default()
        };
        store.set_index_config("alice", cfg.clone()).await.unwrap();
        assert_eq!(store.index_config("alice").await.unwrap(), cfg);

        store
            .add_documents(&cancel, "alice", vec![doc("a")])
            .await
            .unwrap();
        let table = connector.table(URI, "rag_user_alice").unwrap();
        assert_eq!(table.index_config(), Some(cfg));

        // Too late now.
        assert!(store
            .set_index_config("alice", IndexConfig::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rebuild_index() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();

        let missing = store
            .rebuild_index(&cancel, "alice", IndexConfig::default())
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        store
            .add_documents(&cancel, "alice", vec![doc("a")])
            .await
            .unwrap();
        let cfg = IndexConfig {
            index_type: IndexType::IvfHnswSq,
            ..IndexConfig::default()
        };
        store
            .rebuild_index(&cancel, "alice", cfg.clone())
            .await
            .unwrap();

        let table = connector.table(URI, "rag_user_alice").unwrap();
        assert_eq!(table.index_builds(), 2);
        assert_eq!(table.index_config(), Some(cfg.clone()));
        assert_eq!(store.index_config("alice").await.unwrap(), cfg);
    }

    #[tokio::test]
    async fn test_table_exists() {
        let connector = MemoryConnector::new();
        let store = store(&connector).await;
        let cancel = CancellationToken::new();
        assert!(!store.table_exists(&cancel, "alice").await.unwrap());
        store
            .add_documents(&cancel, "alice", vec![doc("a")])
            .await
            .unwrap();
        assert!(store.table_exists(&cancel, "alice").await.unwrap());
        assert!(store.table_exists(&cancel, "bad id").await.is_err());
    }
}
