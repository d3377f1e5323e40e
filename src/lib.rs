//! # zerotrust-scan
//!
//! Zero-trust supply-chain auditing for npm dependency trees.
//!
//! Every resolved package is checked by five detectors, independently of
//! where it came from:
//!
//! - **vulnerability**: published advisories from OSV.dev
//! - **typosquat**: names within a small edit distance of a popular package
//! - **integrity**: installed artifact digest against the registry's
//! - **forensics**: publication history anomalies (dormant revivals,
//!   maintainer changes, rapid releases)
//! - **scripts**: suspicious install-time lifecycle scripts
//!
//! Findings are scored and classified per package and rolled up into a
//! project verdict. Source failures and timeouts are recorded in the report
//! and never stop the scan.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zerotrust_scan::{Config, NpmProject, NpmRegistry, OsvClient, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let project = NpmProject::open(Path::new("."), &config.registry_url)?;
//!     let (packages, artifacts) = project.into_parts();
//!
//!     let registry = NpmRegistry::new(config.registry_url.clone(), artifacts);
//!     let osv = OsvClient::new(config.osv_url.clone());
//!     let orchestrator = Orchestrator::new(config, Arc::new(registry), Arc::new(osv))?;
//!
//!     let report = orchestrator.run(packages).await?;
//!     println!("{}", report.project.classification);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod model;
pub mod output;
pub mod platform;
pub mod similarity;
pub mod sources;

pub use cache::Cache;
pub use config::Config;
pub use engine::Orchestrator;
pub use error::{ConfigError, ScanError, SourceError};
pub use model::{Classification, Finding, PackageRef, PackageVerdict, ScanReport, Severity};
pub use sources::{NpmProject, NpmRegistry, OsvClient};
