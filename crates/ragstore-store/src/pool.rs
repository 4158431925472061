//! Connection pooling.
//!
//! A [`ConnectionPool`] opens a fixed number of connections up front and
//! leases them to one borrower at a time. A semaphore counts the idle
//! connections, so [`ConnectionPool::get`] waits without polling and wakes
//! as soon as a connection is returned.

use parking_lot::Mutex;
use ragstore_core::{StoreConnection, StoreConnector, StoreError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// A fixed-size pool of backend connections.
pub struct ConnectionPool {
    uri: String,
    max_size: usize,
    /// Every connection the pool opened, leased or not
    connections: Vec<Arc<dyn StoreConnection>>,
    idle: Mutex<VecDeque<Arc<dyn StoreConnection>>>,
    /// One permit per idle connection
    permits: Semaphore,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Open `max_size` connections to `uri`.
    ///
    /// If any connect fails, the connections opened so far are closed.
    pub async fn new(
        connector: &dyn StoreConnector,
        uri: &str,
        max_size: usize,
    ) -> Result<Self, StoreError> {
        if max_size == 0 {
            return Err(StoreError::InvalidPoolSize(max_size));
        }

        let mut connections: Vec<Arc<dyn StoreConnection>> = Vec::with_capacity(max_size);
        for i in 0..max_size {
            match connector.connect(uri).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    for conn in &connections {
                        if let Err(close_err) = conn.close().await {
                            warn!("Failed to close pooled connection: {close_err}");
                        }
                    }
                    return Err(StoreError::Connect(format!(
                        "failed to create connection {i}: {e}"
                    )));
                }
            }
        }

        info!("Connection pool ready: {} connections to {}", max_size, uri);
        Ok(Self {
            uri: uri.to_string(),
            max_size,
            idle: Mutex::new(connections.iter().cloned().collect()),
            connections,
            permits: Semaphore::new(max_size),
            closed: AtomicBool::new(false),
        })
    }

    /// URI every pooled connection points at.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Lease a connection, waiting until one is idle.
    ///
    /// Fails with [`StoreError::PoolClosed`] if the pool is or becomes closed
    /// while waiting.
    pub async fn get(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        permit.forget();
        self.pop_idle()
    }

    /// Lease a connection without waiting.
    pub fn try_get(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop_idle()
            }
            Err(TryAcquireError::NoPermits) => Err(StoreError::PoolExhausted {
                capacity: self.max_size,
            }),
            Err(TryAcquireError::Closed) => Err(StoreError::PoolClosed),
        }
    }

    fn pop_idle(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        // A permit guarantees a queued connection.
        self.idle.lock().pop_front().ok_or(StoreError::PoolClosed)
    }

    /// Return a leased connection.
    pub fn put(&self, conn: Arc<dyn StoreConnection>) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        {
            let mut idle = self.idle.lock();
            if idle.len() >= self.max_size {
                return Err(StoreError::PoolFull);
            }
            idle.push_back(conn);
        }
        self.permits.add_permits(1);
        Ok(())
    }

    /// Close the pool and every connection it opened. Idempotent.
    pub async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.permits.close();
        self.idle.lock().clear();

        let mut first_err = None;
        for conn in &self.connections {
            if let Err(e) = conn.close().await {
                warn!("Failed to close pooled connection: {e}");
                first_err.get_or_insert(e);
            }
        }
        debug!("Connection pool for {} closed", self.uri);
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of connections the pool owns.
    pub fn size(&self) -> usize {
        self.max_size
    }

    /// Number of idle connections.
    pub fn available(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.idle.lock().len()
    }

    /// Check that the pool is open.
    pub fn health_check(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        Ok(())
    }

    /// Lease a connection, list tables through it and return it.
    pub async fn health_check_with_connection(&self) -> Result<(), StoreError> {
        let conn = self.get().await?;
        let result = conn.table_names().await;
        self.put(conn)?;
        result.map(|_| ())
    }
}
