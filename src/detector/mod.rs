//! Risk detectors.
//!
//! Every detector implements the [`Detector`] trait: one independent strategy
//! behind a uniform `evaluate` signature. The orchestrator runs every
//! applicable detector for every package and never assumes anything about a
//! detector beyond this trait, so new checks are added by implementing it.
//!
//! | Detector | Finding kind | Needs |
//! |----------|--------------|-------|
//! | [`VulnerabilityDetector`] | `known_vulnerability` | vulnerability database |
//! | [`TyposquatDetector`] | `typosquat` | package name |
//! | [`IntegrityDetector`] | `integrity_mismatch` | metadata (+ local digest) |
//! | [`MetadataForensicsDetector`] | `metadata_anomaly` | metadata |
//! | [`ScriptAuditDetector`] | `suspicious_script` | metadata or local artifact |

mod forensics;
mod integrity;
mod scripts;
mod typosquat;
mod vulnerability;

pub use forensics::MetadataForensicsDetector;
pub use integrity::IntegrityDetector;
pub use scripts::{default_patterns, ScriptAuditDetector, ScriptPattern};
pub use typosquat::TyposquatDetector;
pub use vulnerability::{advisory_severity, parse_cvss_score, VulnerabilityDetector};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{ConfigError, SourceError};
use crate::model::{Finding, LocalArtifact, PackageMetadata, PackageRef};
use crate::similarity::SimilarityIndex;
use crate::sources::VulnDbClient;

/// Which input class a detector cannot work without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Runs on the package identity alone.
    None,
    Metadata,
    Artifact,
    /// Metadata or local artifact, whichever is available.
    Either,
}

impl Requirement {
    pub fn is_satisfied(&self, has_metadata: bool, has_artifact: bool) -> bool {
        match self {
            Requirement::None => true,
            Requirement::Metadata => has_metadata,
            Requirement::Artifact => has_artifact,
            Requirement::Either => has_metadata || has_artifact,
        }
    }
}

/// Everything a detector may look at for one package.
#[derive(Debug, Clone)]
pub struct DetectorInput {
    pub package: Arc<PackageRef>,
    pub metadata: Option<Arc<PackageMetadata>>,
    pub artifact: Option<Arc<LocalArtifact>>,
    /// Reference clock for age-based checks, fixed per scan.
    pub scan_started_at: DateTime<Utc>,
}

impl DetectorInput {
    pub fn new(package: PackageRef, scan_started_at: DateTime<Utc>) -> Self {
        Self {
            package: Arc::new(package),
            metadata: None,
            artifact: None,
            scan_started_at,
        }
    }

    pub fn with_metadata(mut self, metadata: PackageMetadata) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    pub fn with_artifact(mut self, artifact: LocalArtifact) -> Self {
        self.artifact = Some(Arc::new(artifact));
        self
    }
}

/// One risk-detection strategy.
///
/// Implementations must be free of side effects other than queries to their
/// data source, and safe to call concurrently for different packages. A
/// missing input is never an error: skip, or emit a degraded finding.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short identifier used in findings and execution errors.
    fn name(&self) -> &'static str;

    /// One-line explanation of what the detector checks.
    fn description(&self) -> &'static str;

    fn requirement(&self) -> Requirement;

    /// Returns `Err` only when an external source failed.
    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError>;
}

/// The five built-in detectors, configured from `config`.
pub fn standard_detectors(
    config: &Config,
    index: Arc<SimilarityIndex>,
    vulndb: Arc<dyn VulnDbClient>,
) -> Result<Vec<Arc<dyn Detector>>, ConfigError> {
    Ok(vec![
        Arc::new(VulnerabilityDetector::new(
            vulndb,
            config.ecosystem.clone(),
            config.ignore.clone(),
        )),
        Arc::new(TyposquatDetector::new(
            Arc::clone(&index),
            config.typosquat.clone(),
        )),
        Arc::new(IntegrityDetector),
        Arc::new(MetadataForensicsDetector::new(
            config.forensics.clone(),
            index,
        )),
        Arc::new(ScriptAuditDetector::from_config(&config.scripts)?),
    ])
}
