//! Per-scan response cache.
//!
//! Every key is fetched at most once per scan, even when several tasks ask
//! for it concurrently: the first caller runs the fetch and the others wait on
//! the same cell. Failures are cached as well, so a dead source is not
//! hammered once per detector. A cancelled fetch leaves the cell empty for the
//! next caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::limiter::TokenBucket;
use crate::error::SourceError;
use crate::model::{Advisory, LocalArtifact, PackageMetadata, PackageRef};
use crate::sources::VulnDbClient;

type Cell<T> = Arc<OnceCell<Result<Arc<T>, SourceError>>>;

struct Slots<T> {
    cells: Mutex<HashMap<String, Cell<T>>>,
}

impl<T> Slots<T> {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn get_or_fetch<F, Fut>(&self, key: String, fetch: F) -> Result<Arc<T>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_init(|| async { fetch().await.map(Arc::new) })
            .await
            .clone()
    }

    fn len(&self) -> usize {
        self.cells.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Metadata, local artifacts and advisories for the lifetime of one scan.
pub struct ScanCache {
    metadata: Slots<PackageMetadata>,
    artifacts: Slots<LocalArtifact>,
    advisories: Slots<Vec<Advisory>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self {
            metadata: Slots::new(),
            artifacts: Slots::new(),
            advisories: Slots::new(),
        }
    }

    pub async fn metadata<F, Fut>(
        &self,
        package: &PackageRef,
        fetch: F,
    ) -> Result<Arc<PackageMetadata>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PackageMetadata, SourceError>>,
    {
        self.metadata.get_or_fetch(package.key(), fetch).await
    }

    pub async fn artifact<F, Fut>(
        &self,
        package: &PackageRef,
        fetch: F,
    ) -> Result<Arc<LocalArtifact>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LocalArtifact, SourceError>>,
    {
        self.artifacts.get_or_fetch(package.key(), fetch).await
    }

    pub async fn advisories<F, Fut>(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
        fetch: F,
    ) -> Result<Arc<Vec<Advisory>>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Advisory>, SourceError>>,
    {
        let key = format!("{}:{}@{}", ecosystem, name, version);
        self.advisories.get_or_fetch(key, fetch).await
    }

    /// Number of distinct keys requested so far, across all three maps.
    pub fn len(&self) -> usize {
        self.metadata.len() + self.artifacts.len() + self.advisories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ScanCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Vulnerability database seen through the scan cache and the source's rate limiter.
pub struct CachedVulnDb {
    inner: Arc<dyn VulnDbClient>,
    cache: Arc<ScanCache>,
    limiter: Arc<TokenBucket>,
}

impl CachedVulnDb {
    pub fn new(inner: Arc<dyn VulnDbClient>, cache: Arc<ScanCache>, limiter: Arc<TokenBucket>) -> Self {
        Self {
            inner,
            cache,
            limiter,
        }
    }
}

#[async_trait]
impl VulnDbClient for CachedVulnDb {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn query(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<Advisory>, SourceError> {
        let advisories = self
            .cache
            .advisories(ecosystem, name, version, || async {
                self.limiter.acquire().await;
                self.inner.query(ecosystem, name, version).await
            })
            .await?;
        Ok(advisories.as_ref().clone())
    }
}
