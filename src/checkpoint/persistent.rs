use super::cache::CheckpointCache;
use anyhow::{Context, Result};
use fjall::{Config, Keyspace, Partition, PartitionCreateOptions, PersistMode};
use futures::future::BoxFuture;
use std::path::Path;

const PARTITION: &str = "checkpoints";

/// Checkpoint cache persisted in a local fjall keyspace.
///
/// Every write is synced before it is acknowledged, so a checkpoint that was
/// reported as advanced survives a crash. Disk access runs on the blocking pool.
#[derive(Clone)]
pub struct FjallCheckpointCache {
    keyspace: Keyspace,
    partition: Partition,
}

impl FjallCheckpointCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keyspace = Keyspace::open(Config::new(path))
            .with_context(|| format!("failed to open checkpoint keyspace at {}", path.display()))?;
        let partition = keyspace
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .context("failed to open checkpoint partition")?;
        Ok(Self {
            keyspace,
            partition,
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || op(&cache))
            .await
            .context("checkpoint cache task failed")?
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let Some(raw) = self
            .partition
            .get(key)
            .with_context(|| format!("failed to read checkpoint key {key}"))?
        else {
            return Ok(None);
        };
        let value = std::str::from_utf8(&raw)
            .with_context(|| format!("checkpoint key {key} holds non-UTF-8 data"))?;
        Ok(Some(value.to_owned()))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.partition
            .insert(key, value)
            .with_context(|| format!("failed to write checkpoint key {key}"))?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("failed to sync checkpoint keyspace")?;
        Ok(())
    }
}

impl CheckpointCache for FjallCheckpointCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        let key = key.to_owned();
        Box::pin(async move { self.blocking(move |cache| cache.read(&key)).await })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        let key = key.to_owned();
        Box::pin(async move { self.blocking(move |cache| cache.write(&key, &value)).await })
    }
}
