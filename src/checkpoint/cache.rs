use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Minimal get/set contract of the checkpoint cache. Values never expire.
pub trait CheckpointCache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;
}

/// Process-local cache. Loses everything on restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointCache {
    entries: Mutex<HashMap<String, String>>,
    failing_writes: AtomicUsize,
}

impl MemoryCheckpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail, to exercise the retry path.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl CheckpointCache for MemoryCheckpointCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.lock().get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.take_failure() {
                bail!("checkpoint cache unavailable while writing {key}");
            }
            self.lock().insert(key.to_owned(), value);
            Ok(())
        })
    }
}
