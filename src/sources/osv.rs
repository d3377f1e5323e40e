use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::VulnDbClient;
use crate::cache::Cache;
use crate::error::SourceError;
use crate::model::Advisory;

/// OSV.dev vulnerability database client.
pub struct OsvClient {
    client: reqwest::Client,
    base_url: String,
    cache: Option<Cache>,
}

impl OsvClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: None,
        }
    }

    /// Reuses responses from earlier runs while they are younger than the cache TTL.
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl Default for OsvClient {
    fn default() -> Self {
        Self::new("https://api.osv.dev")
    }
}

#[derive(Serialize)]
struct OsvQuery<'a> {
    package: OsvPackage<'a>,
    version: &'a str,
}

#[derive(Serialize)]
struct OsvPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Deserialize)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
}

#[derive(Deserialize)]
struct OsvVuln {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
    summary: Option<String>,
    details: Option<String>,
    severity: Option<Vec<OsvSeverity>>,
    affected: Option<Vec<OsvAffected>>,
    references: Option<Vec<OsvReference>>,
    database_specific: Option<OsvDatabaseSpecific>,
}

#[derive(Deserialize)]
struct OsvSeverity {
    score: Option<String>,
}

#[derive(Deserialize)]
struct OsvAffected {
    ranges: Option<Vec<OsvRange>>,
}

#[derive(Deserialize)]
struct OsvRange {
    events: Option<Vec<OsvEvent>>,
}

#[derive(Deserialize)]
struct OsvEvent {
    fixed: Option<String>,
}

#[derive(Deserialize)]
struct OsvReference {
    url: Option<String>,
}

#[derive(Deserialize)]
struct OsvDatabaseSpecific {
    severity: Option<String>,
}

impl From<OsvVuln> for Advisory {
    fn from(vuln: OsvVuln) -> Self {
        let severity = vuln
            .database_specific
            .as_ref()
            .and_then(|d| d.severity.clone())
            .or_else(|| {
                vuln.severity
                    .as_ref()?
                    .iter()
                    .find_map(|s| s.score.clone())
            });
        let fixed_version = extract_fixed_version(&vuln);
        let reference_url = vuln
            .references
            .and_then(|refs| refs.into_iter().find_map(|r| r.url));

        Advisory {
            id: vuln.id,
            aliases: vuln.aliases,
            summary: vuln.summary.or(vuln.details),
            severity,
            fixed_version,
            reference_url,
        }
    }
}

fn extract_fixed_version(vuln: &OsvVuln) -> Option<String> {
    vuln.affected.as_ref()?.iter().find_map(|affected| {
        affected.ranges.as_ref()?.iter().find_map(|range| {
            range
                .events
                .as_ref()?
                .iter()
                .find_map(|event| event.fixed.clone())
        })
    })
}

#[async_trait]
impl VulnDbClient for OsvClient {
    fn name(&self) -> &'static str {
        "osv"
    }

    async fn query(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<Advisory>, SourceError> {
        let cache_key = format!("osv_{}_{}_{}", ecosystem, name, version);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get::<Vec<Advisory>>(&cache_key)) {
            tracing::debug!(package = %format!("{}@{}", name, version), "OSV cache hit");
            return Ok(cached);
        }

        let query = OsvQuery {
            package: OsvPackage { name, ecosystem },
            version,
        };

        let response = self
            .client
            .post(format!("{}/v1/query", self.base_url))
            .json(&query)
            .send()
            .await?
            .error_for_status()?;

        let body: OsvResponse = response.json().await?;
        let advisories: Vec<Advisory> = body.vulns.into_iter().map(Advisory::from).collect();

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&cache_key, &advisories) {
                tracing::debug!(error = %e, "Failed to write OSV cache entry");
            }
        }

        Ok(advisories)
    }
}
