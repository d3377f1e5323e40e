//! Risk aggregation.
//!
//! Everything here is a pure function of its inputs: no I/O, no clock, no
//! shared state. The orchestrator calls it once per package after all of that
//! package's tasks have settled.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::ScoringConfig;
use crate::model::{
    Classification, ExecutionError, Finding, PackageRef, PackageVerdict, ProjectSummary, Severity,
};

/// Severity descending, then kind in declaration order, then description.
/// Evidence and detector name break any remaining tie.
pub fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.evidence.cmp(&b.evidence))
        .then_with(|| a.detector.cmp(&b.detector))
}

pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(compare_findings);
}

fn weight(severity: Severity, weights: &ScoringConfig) -> u32 {
    match severity {
        Severity::Critical => weights.critical,
        Severity::High => weights.high,
        Severity::Medium => weights.medium,
        Severity::Low => weights.low,
        Severity::Info => weights.info,
    }
}

/// Weighted sum capped at [`ScoringConfig::MAX_SCORE`]. Any critical finding
/// saturates the score regardless of the configured critical weight.
pub fn score(findings: &[Finding], weights: &ScoringConfig) -> u32 {
    let max = ScoringConfig::MAX_SCORE;
    if findings.iter().any(|f| f.severity == Severity::Critical) {
        return max;
    }
    findings
        .iter()
        .fold(0u32, |acc, f| acc.saturating_add(weight(f.severity, weights)))
        .min(max)
}

/// No findings with errors is `Unknown`, never `Pass`.
pub fn classify(
    score: u32,
    finding_count: usize,
    error_count: usize,
    weights: &ScoringConfig,
) -> Classification {
    if finding_count == 0 {
        return if error_count > 0 {
            Classification::Unknown
        } else {
            Classification::Pass
        };
    }
    if score >= weights.fail_threshold {
        Classification::Fail
    } else if score >= weights.warn_threshold {
        Classification::Warn
    } else {
        Classification::PassWithNotes
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskAggregator {
    weights: ScoringConfig,
}

impl RiskAggregator {
    pub fn new(weights: ScoringConfig) -> Self {
        Self { weights }
    }

    pub fn verdict(
        &self,
        package: PackageRef,
        mut findings: Vec<Finding>,
        mut errors: Vec<ExecutionError>,
    ) -> PackageVerdict {
        sort_findings(&mut findings);
        errors.sort();
        let score = score(&findings, &self.weights);
        let classification = classify(score, findings.len(), errors.len(), &self.weights);

        PackageVerdict {
            package,
            project: None,
            findings,
            score,
            classification,
            errors,
        }
    }

    /// Maximum package score, the worst classification, and per-band counts.
    pub fn summarize(&self, verdicts: &[PackageVerdict]) -> ProjectSummary {
        let mut counts: BTreeMap<Classification, usize> = [
            Classification::Pass,
            Classification::PassWithNotes,
            Classification::Warn,
            Classification::Fail,
            Classification::Unknown,
        ]
        .into_iter()
        .map(|c| (c, 0))
        .collect();

        for verdict in verdicts {
            *counts.entry(verdict.classification).or_insert(0) += 1;
        }

        ProjectSummary {
            max_score: verdicts.iter().map(|v| v.score).max().unwrap_or(0),
            classification: verdicts
                .iter()
                .map(|v| v.classification)
                .max_by_key(Classification::rank)
                .unwrap_or(Classification::Pass),
            counts,
            total_packages: verdicts.len(),
            total_findings: verdicts.iter().map(|v| v.findings.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorKind, FindingKind};

    fn package() -> PackageRef {
        PackageRef::new("pkg", "1.0.0", "https://registry.npmjs.org")
    }

    fn finding(kind: FindingKind, severity: Severity, description: &str) -> Finding {
        Finding::new(&package(), "test", kind, severity, description)
    }

    fn error() -> ExecutionError {
        ExecutionError {
            source: "registry".into(),
            package: Some("pkg@1.0.0".into()),
            detector: None,
            kind: ErrorKind::ExternalSource,
            message: "network error".into(),
        }
    }

    #[test]
    fn test_critical_saturates() {
        let weights = ScoringConfig::default();
        let findings = vec![
            finding(FindingKind::Typosquat, Severity::Info, "a"),
            finding(FindingKind::IntegrityMismatch, Severity::Critical, "b"),
            finding(FindingKind::MetadataAnomaly, Severity::Low, "c"),
        ];
        assert_eq!(score(&findings, &weights), 100);

        let verdict = RiskAggregator::default().verdict(package(), findings, vec![]);
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.classification, Classification::Fail);
    }

    #[test]
    fn test_critical_saturates_even_with_low_weight() {
        let weights = ScoringConfig {
            critical: 1,
            ..ScoringConfig::default()
        };
        let findings = vec![finding(FindingKind::KnownVulnerability, Severity::Critical, "x")];
        assert_eq!(score(&findings, &weights), 100);
    }

    #[test]
    fn test_weighted_sum_is_capped() {
        let weights = ScoringConfig::default();
        let three_high: Vec<_> = (0..3)
            .map(|i| finding(FindingKind::KnownVulnerability, Severity::High, &i.to_string()))
            .collect();
        assert_eq!(score(&three_high, &weights), 100);

        let mixed = vec![
            finding(FindingKind::SuspiciousScript, Severity::Medium, "a"),
            finding(FindingKind::MetadataAnomaly, Severity::Low, "b"),
            finding(FindingKind::SuspiciousScript, Severity::Info, "c"),
        ];
        assert_eq!(score(&mixed, &weights), 20);
    }

    #[test]
    fn test_classification_bands() {
        let w = ScoringConfig::default();
        assert_eq!(classify(100, 1, 0, &w), Classification::Fail);
        assert_eq!(classify(70, 1, 0, &w), Classification::Fail);
        assert_eq!(classify(69, 2, 0, &w), Classification::Warn);
        assert_eq!(classify(20, 1, 0, &w), Classification::Warn);
        assert_eq!(classify(19, 1, 0, &w), Classification::PassWithNotes);
        assert_eq!(classify(0, 1, 0, &w), Classification::PassWithNotes);
        assert_eq!(classify(0, 0, 0, &w), Classification::Pass);
        assert_eq!(classify(0, 0, 1, &w), Classification::Unknown);
    }

    #[test]
    fn test_sort_order() {
        let mut findings = vec![
            finding(FindingKind::MetadataAnomaly, Severity::Low, "z"),
            finding(FindingKind::SuspiciousScript, Severity::High, "b"),
            finding(FindingKind::KnownVulnerability, Severity::High, "c"),
            finding(FindingKind::SuspiciousScript, Severity::High, "a"),
            finding(FindingKind::IntegrityMismatch, Severity::Critical, "y"),
        ];
        sort_findings(&mut findings);

        let order: Vec<(&str, Severity)> = findings
            .iter()
            .map(|f| (f.description.as_str(), f.severity))
            .collect();
        assert_eq!(
            order,
            vec![
                ("y", Severity::Critical),
                ("c", Severity::High),
                ("a", Severity::High),
                ("b", Severity::High),
                ("z", Severity::Low),
            ]
        );
    }

    #[test]
    fn test_unknown_is_distinct_from_pass() {
        let aggregator = RiskAggregator::default();
        let failed = aggregator.verdict(package(), vec![], vec![error()]);
        let clean = aggregator.verdict(package(), vec![], vec![]);
        assert_eq!(failed.classification, Classification::Unknown);
        assert_eq!(clean.classification, Classification::Pass);
    }

    #[test]
    fn test_summarize() {
        let aggregator = RiskAggregator::default();
        let verdicts = vec![
            aggregator.verdict(package(), vec![], vec![]),
            aggregator.verdict(package(), vec![], vec![error()]),
            aggregator.verdict(
                package(),
                vec![finding(FindingKind::Typosquat, Severity::Medium, "m")],
                vec![],
            ),
        ];
        let summary = aggregator.summarize(&verdicts);

        assert_eq!(summary.max_score, 15);
        assert_eq!(summary.classification, Classification::Unknown);
        assert_eq!(summary.counts[&Classification::Pass], 1);
        assert_eq!(summary.counts[&Classification::Unknown], 1);
        assert_eq!(summary.counts[&Classification::PassWithNotes], 1);
        assert_eq!(summary.counts[&Classification::Fail], 0);
        assert_eq!(summary.total_packages, 3);
        assert_eq!(summary.total_findings, 1);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = RiskAggregator::default().summarize(&[]);
        assert_eq!(summary.max_score, 0);
        assert_eq!(summary.classification, Classification::Pass);
    }
}
