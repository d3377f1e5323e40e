//! External data sources consumed by the engine.
//!
//! The engine depends only on the traits in this module. The npm registry,
//! OSV.dev and lockfile readers below are the production implementations;
//! tests substitute in-process fakes.

pub mod lockfile;
pub mod npm;
pub mod osv;

pub use lockfile::{find_projects, LocalArtifactIndex, NpmProject};
pub use npm::NpmRegistry;
pub use osv::OsvClient;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{Advisory, LocalArtifact, PackageMetadata, PackageRef, ScanReport};

/// Package registry plus the local install it was resolved into.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fails with `NotFound`, `Network` or `RateLimited`.
    async fn fetch_metadata(&self, package: &PackageRef) -> Result<PackageMetadata, SourceError>;

    /// Fails with `FileMissing` or `HashCompute`.
    async fn fetch_local_artifact(&self, package: &PackageRef)
        -> Result<LocalArtifact, SourceError>;
}

#[async_trait]
pub trait VulnDbClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with `Network` or `RateLimited`.
    async fn query(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<Advisory>, SourceError>;
}

/// Yields the deduplicated set of packages for one project.
pub trait DependencyGraphProvider {
    fn packages(&self) -> anyhow::Result<Vec<PackageRef>>;
}

/// Consumes a finished report.
pub trait ReportSink {
    fn emit(&self, report: &ScanReport) -> anyhow::Result<()>;
}
