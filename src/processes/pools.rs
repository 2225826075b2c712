//! Bounded worker pools backed by semaphores.

use crate::error::{Result, TaskError};
use crate::types::{Identity, PoolKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One bounded pool; a worker runs only while holding a permit
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    fn close(&self) {
        self.semaphore.close();
    }
}

/// Per-remote download pools plus the shared extraction and deletion pools
#[derive(Debug)]
pub(crate) struct WorkerPools {
    downloads: HashMap<String, WorkerPool>,
    source_remotes: BTreeMap<String, String>,
    extract: WorkerPool,
    delete: WorkerPool,
}

impl WorkerPools {
    pub(crate) fn new(
        download_workers_per_remote: &BTreeMap<String, usize>,
        extract_workers: usize,
        delete_workers: usize,
        source_remotes: BTreeMap<String, String>,
    ) -> Self {
        let downloads = download_workers_per_remote
            .iter()
            .map(|(remote, size)| {
                (
                    remote.clone(),
                    WorkerPool::new(format!("download:{}", remote), *size),
                )
            })
            .collect();

        Self {
            downloads,
            source_remotes,
            extract: WorkerPool::new("extract", extract_workers),
            delete: WorkerPool::new("delete", delete_workers),
        }
    }

    /// Pool a task of `kind` for `identity` runs in
    ///
    /// Download pools are selected through the source → remote mapping.
    pub(crate) fn select(&self, kind: PoolKind, identity: &Identity) -> Result<&WorkerPool> {
        match kind {
            PoolKind::Download => self
                .source_remotes
                .get(&identity.source)
                .and_then(|remote| self.downloads.get(remote))
                .ok_or_else(|| {
                    TaskError::UnknownRemote {
                        source_name: identity.source.clone(),
                    }
                    .into()
                }),
            PoolKind::Extract => Ok(&self.extract),
            PoolKind::Delete => Ok(&self.delete),
        }
    }

    /// Close every pool; queued acquires fail immediately
    pub(crate) fn close_all(&self) {
        for pool in self.downloads.values() {
            pool.close();
        }
        self.extract.close();
        self.delete.close();
    }
}
