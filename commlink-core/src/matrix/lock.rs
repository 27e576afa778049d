use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// A held named lock. Dropping it releases the lock.
pub trait LockGuard: Send {}

/// Hands out named mutual-exclusion locks with a bounded wait.
///
/// Implementations backed by a database or cache server give exclusion
/// across processes; [`LocalLockFactory`] only covers the current process.
#[async_trait]
pub trait LockFactory: Send + Sync {
    /// `None` when the lock could not be taken within `timeout`.
    async fn acquire(&self, name: &str, timeout: Duration) -> Option<Box<dyn LockGuard>>;
}

struct LocalGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard for LocalGuard {}

/// Process-local [`LockFactory`]: one tokio mutex per lock name.
#[derive(Debug, Default)]
pub struct LocalLockFactory {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalLockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn named(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_owned()).or_default().clone()
    }
}

#[async_trait]
impl LockFactory for LocalLockFactory {
    async fn acquire(&self, name: &str, timeout: Duration) -> Option<Box<dyn LockGuard>> {
        let mutex = self.named(name);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Some(Box::new(LocalGuard { _guard: guard })),
            Err(_) => {
                debug!("timed out after {timeout:?} waiting for lock {name}");
                None
            }
        }
    }
}
