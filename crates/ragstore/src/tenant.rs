//! Tenant identity and per-tenant table handles.

use ragstore_core::{Error, Result, StoreConnection, StoreError, StoreTable};
use ragstore_store::documents_schema;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Longest accepted tenant id, in bytes.
pub const MAX_TENANT_ID_LEN: usize = 100;

/// Prefix of every tenant table name.
pub const TABLE_PREFIX: &str = "rag_user_";

/// Check that `tenant` is non-empty, at most [`MAX_TENANT_ID_LEN`] bytes and
/// made of ASCII letters, digits, `_` and `-`.
pub fn validate_tenant_id(tenant: &str) -> Result<()> {
    if tenant.is_empty() {
        return Err(Error::validation("tenant id cannot be empty"));
    }
    if tenant.len() > MAX_TENANT_ID_LEN {
        return Err(Error::validation(format!(
            "tenant id too long: {} bytes (max {MAX_TENANT_ID_LEN})",
            tenant.len()
        )));
    }
    if !tenant
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(Error::validation(
            "tenant id contains invalid characters: only letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(())
}

/// Table name for a (validated) tenant.
pub fn table_name(tenant: &str) -> String {
    format!("{TABLE_PREFIX}{tenant}")
}

/// Tenant owning `table`, if it follows the naming scheme.
pub fn tenant_of_table(table: &str) -> Option<&str> {
    table.strip_prefix(TABLE_PREFIX).filter(|t| !t.is_empty())
}

/// Opens, creates and caches tenant tables.
///
/// Handles are cached per tenant, so repeated lookups return the same
/// `Arc`. Creation happens under the cache's write lock: two concurrent
/// first writers for a tenant create the table once.
pub struct TenantTableRegistry {
    conn: Arc<dyn StoreConnection>,
    embedding_dim: usize,
    tables: RwLock<HashMap<String, Arc<dyn StoreTable>>>,
}

impl TenantTableRegistry {
    pub fn new(conn: Arc<dyn StoreConnection>, embedding_dim: usize) -> Self {
        Self {
            conn,
            embedding_dim,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &Arc<dyn StoreConnection> {
        &self.conn
    }

    /// The tenant's table, created with the documents schema if missing.
    pub async fn get_or_create_table(&self, tenant: &str) -> Result<Arc<dyn StoreTable>> {
        validate_tenant_id(tenant)?;
        {
            let tables = self.tables.read().await;
            if let Some(t) = tables.get(tenant) {
                return Ok(Arc::clone(t));
            }
        }

        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get(tenant) {
            return Ok(Arc::clone(t));
        }

        let name = table_name(tenant);
        let table = match self.conn.open_table(&name).await {
            Ok(t) => t,
            Err(StoreError::TableNotFound(_)) => {
                let schema = Arc::new(documents_schema(self.embedding_dim));
                match self.conn.create_table(&name, schema).await {
                    Ok(t) => {
                        info!("Created table {} for tenant {}", name, tenant);
                        t
                    }
                    // Another process created it between our open and create.
                    Err(StoreError::TableAlreadyExists(_)) => {
                        debug!("Table {} appeared concurrently, reopening", name);
                        self.conn.open_table(&name).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        tables.insert(tenant.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// The tenant's table if it exists. Never creates.
    pub async fn open_table(&self, tenant: &str) -> Result<Option<Arc<dyn StoreTable>>> {
        validate_tenant_id(tenant)?;
        {
            let tables = self.tables.read().await;
            if let Some(t) = tables.get(tenant) {
                return Ok(Some(Arc::clone(t)));
            }
        }

        match self.conn.open_table(&table_name(tenant)).await {
            Ok(t) => {
                let mut tables = self.tables.write().await;
                let cached = tables
                    .entry(tenant.to_string())
                    .or_insert_with(|| Arc::clone(&t));
                Ok(Some(Arc::clone(cached)))
            }
            Err(StoreError::TableNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the backend lists the tenant's table.
    pub async fn table_exists(&self, tenant: &str) -> Result<bool> {
        validate_tenant_id(tenant)?;
        let name = table_name(tenant);
        let names = self.conn.table_names().await?;
        Ok(names.iter().any(|n| *n == name))
    }
}
