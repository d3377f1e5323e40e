use serde::{Deserialize, Serialize};

use super::PackageRef;

/// Finding severity. Declaration order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Maps a published severity label onto the five-level scale.
    ///
    /// Accepts the labels used by GHSA, npm audit and NVD. Returns `None` for
    /// anything else so the caller can pick its own fallback.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" | "important" => Some(Severity::High),
            "moderate" | "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "informational" | "none" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finding is about. Declaration order is the tie-break order used
/// when sorting findings of equal severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    KnownVulnerability,
    Typosquat,
    IntegrityMismatch,
    MetadataAnomaly,
    SuspiciousScript,
}

impl FindingKind {
    pub const ALL: [FindingKind; 5] = [
        FindingKind::KnownVulnerability,
        FindingKind::Typosquat,
        FindingKind::IntegrityMismatch,
        FindingKind::MetadataAnomaly,
        FindingKind::SuspiciousScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::KnownVulnerability => "known_vulnerability",
            FindingKind::Typosquat => "typosquat",
            FindingKind::IntegrityMismatch => "integrity_mismatch",
            FindingKind::MetadataAnomaly => "metadata_anomaly",
            FindingKind::SuspiciousScript => "suspicious_script",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FindingKind::KnownVulnerability => "Known vulnerability",
            FindingKind::Typosquat => "Typosquat",
            FindingKind::IntegrityMismatch => "Integrity mismatch",
            FindingKind::MetadataAnomaly => "Metadata anomaly",
            FindingKind::SuspiciousScript => "Suspicious script",
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Structured evidence attached to a finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    Advisory {
        id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        aliases: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fixed_version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    SimilarName {
        candidate: String,
        distance: usize,
    },
    Digest {
        #[serde(skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        actual: Option<String>,
    },
    ReleaseGap {
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_version: Option<String>,
        hours: i64,
    },
    MaintainerChange {
        previous: Vec<String>,
        current: Vec<String>,
    },
    ScriptMatch {
        script: String,
        pattern: String,
        matched: String,
    },
    Note {
        text: String,
    },
}

/// One atomic piece of evidence produced by one detector for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub package: PackageRef,
    pub detector: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl Finding {
    pub fn new(
        package: &PackageRef,
        detector: impl Into<String>,
        kind: FindingKind,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            package: package.clone(),
            detector: detector.into(),
            kind,
            severity,
            description: description.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_from_label() {
        assert_eq!(Severity::from_label("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::from_label("Moderate"), Some(Severity::Medium));
        assert_eq!(Severity::from_label(" low "), Some(Severity::Low));
        assert_eq!(Severity::from_label("spicy"), None);
    }

    #[test]
    fn test_kind_order_follows_declaration() {
        let mut kinds = FindingKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, FindingKind::ALL.to_vec());
    }

    #[test]
    fn test_evidence_serializes_tagged() {
        let ev = Evidence::SimilarName {
            candidate: "requests".into(),
            distance: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "similar_name");
        assert_eq!(json["candidate"], "requests");
    }
}
