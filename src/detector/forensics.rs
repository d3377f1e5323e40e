use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Detector, DetectorInput, Requirement};
use crate::config::ForensicsConfig;
use crate::error::SourceError;
use crate::model::{Evidence, Finding, FindingKind, PackageMetadata, PackageRef, Severity};
use crate::similarity::SimilarityIndex;

/// Publication-history anomalies. Each rule is independent and every rule
/// that applies produces its own finding:
///
/// - `rapid-release`: published within the grace period after the previous version
/// - `dormant-package-revival`: a widely used package released after a long silence
/// - `maintainer-change`: maintainers differ from the previous version without a
///   major version bump
/// - `fresh-release`: published shortly before the scan started
/// - `immature-package`: very few versions published in total
pub struct MetadataForensicsDetector {
    config: ForensicsConfig,
    popular: Arc<SimilarityIndex>,
}

impl MetadataForensicsDetector {
    pub fn new(config: ForensicsConfig, popular: Arc<SimilarityIndex>) -> Self {
        Self { config, popular }
    }

    /// Download count when the registry reports one, popular-list membership otherwise.
    fn is_widely_used(&self, package: &PackageRef, metadata: &PackageMetadata) -> bool {
        match metadata.weekly_downloads {
            Some(downloads) => downloads >= self.config.widely_used_weekly_downloads,
            None => self.popular.contains(&package.name),
        }
    }

    fn anomaly(&self, package: &PackageRef, severity: Severity, rule: &str, detail: String) -> Finding {
        Finding::new(
            package,
            self.name(),
            FindingKind::MetadataAnomaly,
            severity,
            format!("{}: {}", rule, detail),
        )
    }

    /// Runs every rule. Pure function of its inputs.
    pub fn inspect(
        &self,
        package: &PackageRef,
        metadata: &PackageMetadata,
        now: DateTime<Utc>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let published_at = metadata.published_at.or_else(|| {
            metadata
                .releases
                .iter()
                .find(|r| r.version == package.version)
                .map(|r| r.published_at)
        });
        let previous = metadata.previous_release(&package.version);

        if let (Some(published), Some(prev)) = (published_at, previous) {
            let gap = published - prev.published_at;

            if gap >= chrono::Duration::zero() && gap < self.config.rapid_release_grace() {
                findings.push(
                    self.anomaly(
                        package,
                        Severity::Low,
                        "rapid-release",
                        format!(
                            "{} published {}h after {}",
                            package.version,
                            gap.num_hours(),
                            prev.version
                        ),
                    )
                    .with_evidence(Evidence::ReleaseGap {
                        previous_version: Some(prev.version.clone()),
                        hours: gap.num_hours(),
                    }),
                );
            }

            if gap > self.config.dormant_period() && self.is_widely_used(package, metadata) {
                findings.push(
                    self.anomaly(
                        package,
                        Severity::Medium,
                        "dormant-package-revival",
                        format!(
                            "{} published after {} days without a release",
                            package.version,
                            gap.num_days()
                        ),
                    )
                    .with_evidence(Evidence::ReleaseGap {
                        previous_version: Some(prev.version.clone()),
                        hours: gap.num_hours(),
                    }),
                );
            }
        }

        if let Some(prev) = previous {
            let current_maintainers = metadata
                .releases
                .iter()
                .find(|r| r.version == package.version)
                .map(|r| &r.maintainers)
                .filter(|m| !m.is_empty())
                .unwrap_or(&metadata.maintainers);

            let before: BTreeSet<&str> = prev.maintainers.iter().map(String::as_str).collect();
            let after: BTreeSet<&str> = current_maintainers.iter().map(String::as_str).collect();

            if !before.is_empty()
                && !after.is_empty()
                && before != after
                && !is_major_bump(&prev.version, &package.version)
            {
                let added: Vec<&str> = after.difference(&before).copied().collect();
                findings.push(
                    self.anomaly(
                        package,
                        Severity::Medium,
                        "maintainer-change",
                        if added.is_empty() {
                            format!("maintainers removed since {}", prev.version)
                        } else {
                            format!("new maintainers since {}: {}", prev.version, added.join(", "))
                        },
                    )
                    .with_evidence(Evidence::MaintainerChange {
                        previous: before.iter().map(|s| s.to_string()).collect(),
                        current: after.iter().map(|s| s.to_string()).collect(),
                    }),
                );
            }
        }

        if let Some(published) = published_at {
            let age = now - published;
            if age >= chrono::Duration::zero() && age < self.config.fresh_release_window() {
                findings.push(
                    self.anomaly(
                        package,
                        Severity::Low,
                        "fresh-release",
                        format!("{} published {}h before the scan", package.version, age.num_hours()),
                    )
                    .with_evidence(Evidence::ReleaseGap {
                        previous_version: None,
                        hours: age.num_hours(),
                    }),
                );
            }
        }

        let versions = metadata.releases.len();
        if versions > 0 && versions < self.config.min_version_count {
            findings.push(self.anomaly(
                package,
                Severity::Info,
                "immature-package",
                format!("only {} version(s) published", versions),
            ));
        }

        findings
    }
}

/// True when `current` raises the major version over `previous`.
/// Unparseable versions never count as a bump.
fn is_major_bump(previous: &str, current: &str) -> bool {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v')).ok();
    match (parse(previous), parse(current)) {
        (Some(prev), Some(cur)) => cur.major > prev.major,
        _ => false,
    }
}

#[async_trait]
impl Detector for MetadataForensicsDetector {
    fn name(&self) -> &'static str {
        "forensics"
    }

    fn description(&self) -> &'static str {
        "Publication history and maintainer anomalies"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Metadata
    }

    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
        let Some(metadata) = input.metadata.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(self.inspect(&input.package, metadata, input.scan_started_at))
    }
}
