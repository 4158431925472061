//! Process-wide connection pool.
//!
//! Convenience layer over [`ConnectionPool`] for applications that want one
//! shared pool without threading it through their own types.

use parking_lot::Mutex;
use ragstore_core::{StoreConnector, StoreError};
use std::sync::Arc;
use tracing::warn;

use crate::pool::ConnectionPool;

static GLOBAL_POOL: Mutex<Option<Arc<ConnectionPool>>> = Mutex::new(None);

/// Create the global pool. Fails if one already exists.
pub async fn init_global_pool(
    connector: &dyn StoreConnector,
    uri: &str,
    max_size: usize,
) -> Result<Arc<ConnectionPool>, StoreError> {
    if GLOBAL_POOL.lock().is_some() {
        return Err(StoreError::PoolAlreadyInitialized);
    }

    let pool = Arc::new(ConnectionPool::new(connector, uri, max_size).await?);

    let lost_race = {
        let mut slot = GLOBAL_POOL.lock();
        if slot.is_some() {
            true
        } else {
            *slot = Some(Arc::clone(&pool));
            false
        }
    };
    if lost_race {
        if let Err(e) = pool.close().await {
            warn!("Failed to close surplus pool: {e}");
        }
        return Err(StoreError::PoolAlreadyInitialized);
    }
    Ok(pool)
}

/// The global pool, if initialized.
pub fn global_pool() -> Result<Arc<ConnectionPool>, StoreError> {
    GLOBAL_POOL
        .lock()
        .clone()
        .ok_or(StoreError::PoolNotInitialized)
}

/// Close and forget the global pool. A no-op when none exists.
pub async fn close_global_pool() -> Result<(), StoreError> {
    let pool = GLOBAL_POOL.lock().take();
    match pool {
        Some(pool) => pool.close().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;

    // Single test: the global slot is shared by every test in this binary.
    #[tokio::test]
    async fn test_global_pool_lifecycle() {
        let connector = MemoryConnector::new();

        assert!(matches!(global_pool(), Err(StoreError::PoolNotInitialized)));
        close_global_pool().await.unwrap();

        let pool = init_global_pool(&connector, "memory://global", 2)
            .await
            .unwrap();
        assert_eq!(pool.size(), 2);
        assert!(Arc::ptr_eq(&pool, &global_pool().unwrap()));

        let again = init_global_pool(&connector, "memory://global", 2).await;
        assert!(matches!(again, Err(StoreError::PoolAlreadyInitialized)));

        close_global_pool().await.unwrap();
        assert!(pool.is_closed());
        assert!(global_pool().is_err());
        assert_eq!(connector.stats().closes, 2);
    }
}
