use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Finding, PackageRef};

/// Pass/warn/fail band of a package or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Pass,
    PassWithNotes,
    Warn,
    Fail,
    /// No findings, but at least one check could not run.
    Unknown,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Pass => "pass",
            Classification::PassWithNotes => "pass-with-notes",
            Classification::Warn => "warn",
            Classification::Fail => "fail",
            Classification::Unknown => "unknown",
        }
    }

    /// Rank used to pick the project-level classification.
    /// `unknown` sits above the passing bands: not knowing is worse than a note.
    pub fn rank(&self) -> u8 {
        match self {
            Classification::Pass => 0,
            Classification::PassWithNotes => 1,
            Classification::Unknown => 2,
            Classification::Warn => 3,
            Classification::Fail => 4,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExternalSource,
    Timeout,
    /// A programming defect, such as a detector reporting on the wrong package.
    Internal,
}

/// A failure that was recorded instead of aborting the scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Where the failure came from: `registry`, `local`, `vulndb`, `scan`
    /// or a detector name.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVerdict {
    pub package: PackageRef,
    /// Project the package was installed in, for multi-project scans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub findings: Vec<Finding>,
    pub score: u32,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ExecutionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub max_score: u32,
    pub classification: Classification,
    pub counts: BTreeMap<Classification, usize>,
    pub total_packages: usize,
    pub total_findings: usize,
}

/// The whole-run result handed to the output layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ScanStatus,
    pub detectors: Vec<String>,
    /// One verdict per input package, in input order.
    pub verdicts: Vec<PackageVerdict>,
    pub project: ProjectSummary,
    pub errors: Vec<ExecutionError>,
}

impl ScanReport {
    pub fn verdict(&self, package: &PackageRef) -> Option<&PackageVerdict> {
        self.verdicts.iter().find(|v| &v.package == package)
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.verdicts.iter().flat_map(|v| v.findings.iter())
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.project
            .counts
            .get(&classification)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_outranks_passing_bands() {
        assert!(Classification::Unknown.rank() > Classification::PassWithNotes.rank());
        assert!(Classification::Warn.rank() > Classification::Unknown.rank());
        assert!(Classification::Fail.rank() > Classification::Warn.rank());
    }

    #[test]
    fn test_classification_serializes_kebab_case() {
        let json = serde_json::to_string(&Classification::PassWithNotes).unwrap();
        assert_eq!(json, "\"pass-with-notes\"");

        let mut counts = BTreeMap::new();
        counts.insert(Classification::Unknown, 2usize);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, "{\"unknown\":2}");
    }
}
