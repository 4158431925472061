//! Lazy, once-per-tenant similarity index builds.

use parking_lot::{Mutex, RwLock};
use ragstore_core::{columns, Error, IndexConfig, Result, StoreTable};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as BuildLock;
use tracing::{info, warn};

#[derive(Default)]
struct IndexState {
    created: HashSet<String>,
    configs: HashMap<String, IndexConfig>,
}

/// Tracks which tenants have an index and which config each one uses.
///
/// The state lock is never held across an await, so searches reading a
/// tenant's metric do not wait on a build. Builds and config changes for one
/// tenant are serialized by that tenant's build lock; concurrent callers
/// after the first write observe exactly one build.
#[derive(Default)]
pub struct IndexManager {
    state: RwLock<IndexState>,
    builds: Mutex<HashMap<String, Arc<BuildLock<()>>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_lock(&self, tenant: &str) -> Arc<BuildLock<()>> {
        Arc::clone(self.builds.lock().entry(tenant.to_string()).or_default())
    }

    /// Build the tenant's index on `table` unless it already exists.
    ///
    /// A failed build leaves the tenant unmarked, so the next call retries.
    pub async fn ensure_index(&self, table: &dyn StoreTable, tenant: &str) -> Result<()> {
        if self.is_created(tenant) {
            return Ok(());
        }

        let lock = self.build_lock(tenant);
        let _build = lock.lock().await;
        let config = {
            let state = self.state.read();
            if state.created.contains(tenant) {
                return Ok(());
            }
            state.configs.get(tenant).cloned().unwrap_or_default()
        };

        info!(
            "Creating {:?} index ({:?}) for tenant {}",
            config.index_type, config.metric, tenant
        );
        if let Err(e) = table.create_index(columns::EMBEDDING, &config).await {
            warn!("Failed to create index for tenant {}: {}", tenant, e);
            return Err(e.into());
        }

        self.state.write().created.insert(tenant.to_string());
        info!("Created vector index for tenant {}", tenant);
        Ok(())
    }

    /// Choose the index config for a tenant whose index is not built yet.
    pub async fn set_index_config(&self, tenant: &str, config: IndexConfig) -> Result<()> {
        let lock = self.build_lock(tenant);
        let _build = lock.lock().await;
        let mut state = self.state.write();
        if state.created.contains(tenant) {
            return Err(Error::validation(format!(
                "index already created for tenant {tenant}; clear data or rebuild to apply a new config"
            )));
        }
        state.configs.insert(tenant.to_string(), config);
        Ok(())
    }

    /// The tenant's explicit config, or the default.
    pub fn index_config(&self, tenant: &str) -> IndexConfig {
        self.state
            .read()
            .configs
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_created(&self, tenant: &str) -> bool {
        self.state.read().created.contains(tenant)
    }

    /// Store a new config and mark the index as not built.
    pub async fn replace_config(&self, tenant: &str, config: IndexConfig) {
        let lock = self.build_lock(tenant);
        let _build = lock.lock().await;
        let mut state = self.state.write();
        state.configs.insert(tenant.to_string(), config);
        state.created.remove(tenant);
    }

    /// Forget that the tenant's index was built.
    pub async fn forget(&self, tenant: &str) {
        let lock = self.build_lock(tenant);
        let _build = lock.lock().await;
        self.state.write().created.remove(tenant);
    }
}
