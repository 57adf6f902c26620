//! Provided fetch adapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{compute_fingerprint, FetchAdapter, FetchedDocument};

/// Url-to-bytes map, mutable between cycles.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    delays: RwLock<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.documents.write().insert(url.to_string(), bytes);
    }

    pub fn remove(&self, url: &str) -> Option<Vec<u8>> {
        self.documents.write().remove(url)
    }

    /// Delay every fetch of `url`, to simulate a slow server.
    pub fn set_delay(&self, url: &str, delay: Duration) {
        self.delays.write().insert(url.to_string(), delay);
    }

    /// Number of fetches served or failed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchAdapter for InMemoryFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.read().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .documents
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no document registered for {}", url))?;
        Ok(FetchedDocument::new(bytes))
    }
}

/// Offline loader reading `<dir>/<sha256(url)>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// File holding the cached copy of `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", compute_fingerprint(url.as_bytes())))
    }

    /// Store a copy of `url`; used to seed the offline directory.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.path_for(url);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl FetchAdapter for DirectoryFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument> {
        let path = self.path_for(url);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading offline copy {} of {}", path.display(), url))?;
        Ok(FetchedDocument::new(bytes))
    }
}
