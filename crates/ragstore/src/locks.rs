//! Per-tenant write serialization.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Hands out one mutex per tenant.
///
/// Writers for a tenant hold its mutex for their whole operation. Readers
/// never take it.
#[derive(Default)]
pub struct UserLockRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tenant's mutex, created on first use.
    pub async fn lock_for(&self, tenant: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(tenant) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.locks.write().await;
        Arc::clone(locks.entry(tenant.to_string()).or_default())
    }

    /// Number of tenants that have a mutex.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tenant_same_lock() {
        let reg = UserLockRegistry::new();
        let a = reg.lock_for("alice").await;
        let b = reg.lock_for("alice").await;
        let c = reg.lock_for("bob").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_yields_one_lock() {
        let reg = Arc::new(UserLockRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move { reg.lock_for("alice").await }));
        }
        let mut locks = Vec::new();
        for h in handles {
            locks.push(h.await.unwrap());
        }
        assert!(locks.iter().all(|l| Arc::ptr_eq(l, &locks[0])));
    }

    #[tokio::test]
    async fn test_tenants_do_not_block_each_other() {
        let reg = UserLockRegistry::new();
        let alice = reg.lock_for("alice").await;
        let _held = alice.lock().await;

        let bob = reg.lock_for("bob").await;
        let acquired = tokio::time::timeout(Duration::from_millis(100), bob.lock()).await;
        assert!(acquired.is_ok());

        let again = reg.lock_for("alice").await;
        assert!(again.try_lock().is_err());
    }
}
