use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle hooks a package manager runs automatically at install time.
pub const LIFECYCLE_SCRIPTS: [&str; 3] = ["preinstall", "install", "postinstall"];

/// Identity of one resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    pub version: String,
    pub source: String,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requested: None,
            version: version.into(),
            source: source.into(),
        }
    }

    pub fn with_requested(mut self, range: impl Into<String>) -> Self {
        self.requested = Some(range.into());
        self
    }

    /// `name@version`, used for cache keys and report lookups.
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha256" => Some(DigestAlgorithm::Sha256),
            "sha384" => Some(DigestAlgorithm::Sha384),
            "sha512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Length of the raw digest in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An integrity digest: algorithm plus the hash in whatever encoding it was
/// published in (hex or base64).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub value: String,
}

impl Digest {
    pub fn new(algorithm: DigestAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }

    /// Parses the digest notations found in lockfiles and registry documents:
    ///
    /// - SRI: `sha512-<base64>`
    /// - prefixed: `sha256:<hex or base64>`
    /// - bare 40-character hex, which npm publishes as the legacy `shasum`
    ///
    /// Multi-hash SRI strings (`sha1-... sha512-...`) yield the strongest hash.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.contains(char::is_whitespace) {
            return s
                .split_whitespace()
                .filter_map(Digest::parse)
                .max_by_key(|d| d.algorithm);
        }

        for sep in ['-', ':'] {
            if let Some((algo, value)) = s.split_once(sep) {
                if let Some(algorithm) = DigestAlgorithm::parse(algo) {
                    if value.is_empty() {
                        return None;
                    }
                    return Some(Digest::new(algorithm, value));
                }
            }
        }

        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(Digest::new(DigestAlgorithm::Sha1, s.to_ascii_lowercase()));
        }

        None
    }

    /// Decodes the hash into raw bytes, accepting hex or standard base64.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        let expected = self.algorithm.output_len();
        if self.value.len() == expected * 2 {
            if let Ok(raw) = hex::decode(&self.value) {
                return Some(raw);
            }
        }
        STANDARD
            .decode(&self.value)
            .ok()
            .filter(|raw| raw.len() == expected)
    }

    /// True when both digests use the same algorithm and encode the same hash.
    pub fn matches(&self, other: &Digest) -> bool {
        if self.algorithm != other.algorithm {
            return false;
        }
        match (self.bytes(), other.bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => self.value.eq_ignore_ascii_case(&other.value),
        }
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// One published version in a package's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<String>,
}

impl Release {
    pub fn new(version: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            published_at,
            maintainers: Vec::new(),
        }
    }

    pub fn with_maintainers<I, S>(mut self, maintainers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.maintainers = maintainers.into_iter().map(Into::into).collect();
        self
    }
}

/// Registry-derived facts about the resolved version of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub maintainers: Vec<String>,
    /// Every published version, oldest first. Includes the resolved version.
    #[serde(default)]
    pub releases: Vec<Release>,
    /// Scripts declared in the published manifest of the resolved version.
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub published_digests: Vec<Digest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_downloads: Option<u64>,
}

impl PackageMetadata {
    /// The release that immediately precedes `version` in publication order.
    ///
    /// When `version` is not part of the history, the latest release published
    /// before `published_at` is used instead.
    pub fn previous_release(&self, version: &str) -> Option<&Release> {
        if let Some(pos) = self.releases.iter().position(|r| r.version == version) {
            return pos.checked_sub(1).and_then(|i| self.releases.get(i));
        }
        let published = self.published_at?;
        self.releases
            .iter()
            .filter(|r| r.published_at < published)
            .max_by_key(|r| r.published_at)
    }

    pub fn digest_for(&self, algorithm: DigestAlgorithm) -> Option<&Digest> {
        self.published_digests
            .iter()
            .find(|d| d.algorithm == algorithm)
    }
}

/// On-disk facts about an installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArtifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

/// A vulnerability database entry affecting a package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Free-form severity as published: a label, a CVSS score or a CVSS vector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
}

impl Advisory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            summary: None,
            severity: None,
            fixed_version: None,
            reference_url: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}
