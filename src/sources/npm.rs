use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{LocalArtifactIndex, RegistryClient};
use crate::cache::Cache;
use crate::engine::TokenBucket;
use crate::error::SourceError;
use crate::model::{Digest, LocalArtifact, PackageMetadata, PackageRef, Release};

const DOWNLOADS_URL: &str = "https://api.npmjs.org";

/// npm registry client. Local artifacts are served from the project's
/// [`LocalArtifactIndex`].
///
/// The caller rate-limits `fetch_metadata` as a whole; the download-count
/// request goes to a second host and waits on its own bucket.
pub struct NpmRegistry {
    client: reqwest::Client,
    registry_url: String,
    downloads_url: Option<String>,
    downloads_limiter: Option<Arc<TokenBucket>>,
    cache: Option<Cache>,
    artifacts: LocalArtifactIndex,
}

impl NpmRegistry {
    pub fn new(registry_url: impl Into<String>, artifacts: LocalArtifactIndex) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            downloads_url: Some(DOWNLOADS_URL.to_string()),
            downloads_limiter: None,
            cache: None,
            artifacts,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Download counts are skipped when `None`.
    pub fn with_downloads_url(mut self, url: Option<String>) -> Self {
        self.downloads_url = url;
        self
    }

    /// Shared by every registry that talks to the same downloads host.
    pub fn with_downloads_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.downloads_limiter = Some(limiter);
        self
    }

    fn document_url(&self, name: &str) -> String {
        format!("{}/{}", self.registry_url, name.replace('/', "%2F"))
    }

    async fn fetch_document(&self, name: &str) -> Result<RegistryDocument, SourceError> {
        let response = self
            .client
            .get(self.document_url(name))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Absence of download statistics is never an error.
    async fn fetch_weekly_downloads(&self, name: &str) -> Option<u64> {
        let base = self.downloads_url.as_ref()?;
        let url = format!("{}/downloads/point/last-week/{}", base, name);
        if let Some(limiter) = &self.downloads_limiter {
            limiter.acquire().await;
        }

        #[derive(Deserialize)]
        struct Downloads {
            downloads: Option<u64>,
        }

        let result: Result<Downloads, reqwest::Error> = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            response.json::<Downloads>().await
        }
        .await;

        match result {
            Ok(d) => d.downloads,
            Err(e) => {
                tracing::debug!(package = %name, error = %e, "Download count unavailable");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    time: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, VersionManifest>,
    #[serde(default)]
    maintainers: Vec<Person>,
}

#[derive(Deserialize)]
struct VersionManifest {
    #[serde(default)]
    maintainers: Vec<Person>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    dist: Option<Dist>,
}

#[derive(Deserialize)]
struct Dist {
    integrity: Option<String>,
    shasum: Option<String>,
}

/// Registry documents spell people either as objects or as `"name <email>"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Person {
    Object { name: Option<String> },
    Text(String),
}

impl Person {
    fn name(&self) -> Option<String> {
        let name = match self {
            Person::Object { name } => name.as_deref()?,
            Person::Text(text) => text.split('<').next()?.trim(),
        };
        (!name.is_empty()).then(|| name.to_string())
    }
}

fn names(people: &[Person]) -> Vec<String> {
    people.iter().filter_map(Person::name).collect()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Builds the metadata for one version out of a full registry document.
fn metadata_from_document(
    doc: &RegistryDocument,
    package: &PackageRef,
) -> Result<PackageMetadata, SourceError> {
    let manifest = doc
        .versions
        .get(&package.version)
        .ok_or_else(|| SourceError::NotFound(package.key()))?;

    let mut releases: Vec<Release> = doc
        .time
        .iter()
        .filter(|(version, _)| version.as_str() != "created" && version.as_str() != "modified")
        .filter_map(|(version, time)| {
            let mut release = Release::new(version.clone(), parse_time(time)?);
            if let Some(m) = doc.versions.get(version) {
                release.maintainers = names(&m.maintainers);
            }
            Some(release)
        })
        .collect();
    releases.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.version.cmp(&b.version))
    });

    let mut maintainers = names(&manifest.maintainers);
    if maintainers.is_empty() {
        maintainers = names(&doc.maintainers);
    }

    let published_digests: Vec<Digest> = manifest
        .dist
        .as_ref()
        .map(|dist| {
            dist.integrity
                .iter()
                .chain(dist.shasum.iter())
                .filter_map(|d| Digest::parse(d))
                .collect()
        })
        .unwrap_or_default();

    Ok(PackageMetadata {
        published_at: doc.time.get(&package.version).and_then(|t| parse_time(t)),
        maintainers,
        releases,
        scripts: manifest.scripts.clone(),
        published_digests,
        weekly_downloads: None,
    })
}

#[async_trait]
impl RegistryClient for NpmRegistry {
    async fn fetch_metadata(&self, package: &PackageRef) -> Result<PackageMetadata, SourceError> {
        let cache_key = format!("npm_{}", package.key());
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get::<PackageMetadata>(&cache_key)) {
            tracing::debug!(package = %package, "Registry cache hit");
            return Ok(cached);
        }

        let doc = self.fetch_document(&package.name).await?;
        let mut metadata = metadata_from_document(&doc, package)?;
        metadata.weekly_downloads = self.fetch_weekly_downloads(&package.name).await;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&cache_key, &metadata) {
                tracing::debug!(error = %e, "Failed to write registry cache entry");
            }
        }

        Ok(metadata)
    }

    async fn fetch_local_artifact(&self, package: &PackageRef) -> Result<LocalArtifact, SourceError> {
        self.artifacts.get(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DigestAlgorithm;

    const DOCUMENT: &str = r#"{
        "name": "left-pad",
        "maintainers": [{"name": "stevemao", "email": "x@example.com"}],
        "time": {
            "created": "2014-03-14T00:00:00.000Z",
            "modified": "2020-01-01T00:00:00.000Z",
            "1.2.0": "2016-01-01T00:00:00.000Z",
            "1.0.0": "2014-03-14T00:00:00.000Z",
            "1.3.0": "2018-04-09T00:00:00.000Z"
        },
        "versions": {
            "1.0.0": {"maintainers": ["azer <azer@example.com>"]},
            "1.2.0": {"maintainers": [{"name": "azer"}]},
            "1.3.0": {
                "maintainers": [{"name": "stevemao"}],
                "scripts": {"test": "node test", "postinstall": "node setup.js"},
                "dist": {
                    "integrity": "sha512-AAAA",
                    "shasum": "0123456789abcdef0123456789abcdef01234567"
                }
            }
        }
    }"#;

    fn package(version: &str) -> PackageRef {
        PackageRef::new("left-pad", version, "https://registry.npmjs.org")
    }

    #[test]
    fn test_metadata_from_document() {
        let doc: RegistryDocument = serde_json::from_str(DOCUMENT).unwrap();
        let meta = metadata_from_document(&doc, &package("1.3.0")).unwrap();

        let versions: Vec<&str> = meta.releases.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0.0", "1.2.0", "1.3.0"]);
        assert_eq!(meta.releases[0].maintainers, vec!["azer".to_string()]);
        assert_eq!(meta.maintainers, vec!["stevemao".to_string()]);
        assert_eq!(meta.published_at, parse_time("2018-04-09T00:00:00.000Z"));
        assert_eq!(meta.scripts["postinstall"], "node setup.js");

        let algorithms: Vec<DigestAlgorithm> =
            meta.published_digests.iter().map(|d| d.algorithm).collect();
        assert_eq!(algorithms, vec![DigestAlgorithm::Sha512, DigestAlgorithm::Sha1]);
        assert_eq!(meta.previous_release("1.3.0").unwrap().version, "1.2.0");
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let doc: RegistryDocument = serde_json::from_str(DOCUMENT).unwrap();
        assert!(matches!(
            metadata_from_document(&doc, &package("9.9.9")),
            Err(SourceError::NotFound(key)) if key == "left-pad@9.9.9"
        ));
    }

    #[test]
    fn test_text_maintainers_and_missing_dist() {
        let doc: RegistryDocument = serde_json::from_str(DOCUMENT).unwrap();
        let meta = metadata_from_document(&doc, &package("1.0.0")).unwrap();
        assert_eq!(meta.maintainers, vec!["azer".to_string()]);
        assert!(meta.published_digests.is_empty());
    }

    #[test]
    fn test_scoped_document_url() {
        let registry = NpmRegistry::new("https://registry.npmjs.org/", LocalArtifactIndex::new());
        assert_eq!(
            registry.document_url("@types/node"),
            "https://registry.npmjs.org/@types%2Fnode"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_counts_wait_on_their_own_limiter() {
        let limiter = Arc::new(TokenBucket::new("downloads", 1.0));
        // The scheme is rejected before any connection is made.
        let registry = NpmRegistry::new("https://registry.npmjs.org", LocalArtifactIndex::new())
            .with_downloads_url(Some("ftp://downloads.invalid".to_string()))
            .with_downloads_limiter(Arc::clone(&limiter));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            assert_eq!(registry.fetch_weekly_downloads("left-pad").await, None);
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(1990), "{:?}", elapsed);

        let unlimited = NpmRegistry::new("https://registry.npmjs.org", LocalArtifactIndex::new())
            .with_downloads_url(None)
            .with_downloads_limiter(limiter);
        let start = tokio::time::Instant::now();
        assert_eq!(unlimited.fetch_weekly_downloads("left-pad").await, None);
        assert!(start.elapsed() < std::time::Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_local_artifact_comes_from_index() {
        let mut index = LocalArtifactIndex::new();
        index.insert(&package("1.3.0"), Ok(LocalArtifact::default()));
        let registry = NpmRegistry::new("https://registry.npmjs.org", index);

        assert!(registry.fetch_local_artifact(&package("1.3.0")).await.is_ok());
        assert!(matches!(
            registry.fetch_local_artifact(&package("1.0.0")).await,
            Err(SourceError::FileMissing(_))
        ));
    }
}
