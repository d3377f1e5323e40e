//! Core data types shared by the detectors, the orchestrator and the output layer.
//!
//! - [`PackageRef`] - identity of one resolved dependency
//! - [`PackageMetadata`] - registry facts about a [`PackageRef`]
//! - [`LocalArtifact`] - on-disk facts about a [`PackageRef`]
//! - [`Advisory`] - one entry returned by the vulnerability database
//! - [`Finding`] - one piece of evidence produced by one detector
//! - [`PackageVerdict`] / [`ScanReport`] - the aggregated result of a scan
//!
//! # Example
//!
//! ```
//! use zerotrust_scan::model::{Finding, FindingKind, PackageRef, Severity};
//!
//! let package = PackageRef::new("lodash", "4.17.21", "https://registry.npmjs.org");
//! let finding = Finding::new(
//!     &package,
//!     "typosquat",
//!     FindingKind::Typosquat,
//!     Severity::High,
//!     "name resembles a popular package",
//! );
//!
//! assert_eq!(finding.package.key(), "lodash@4.17.21");
//! ```

mod finding;
mod package;
mod report;

pub use finding::*;
pub use package::*;
pub use report::*;
