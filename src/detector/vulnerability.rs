use std::sync::Arc;

use async_trait::async_trait;

use super::{Detector, DetectorInput, Requirement};
use crate::config::IgnoreConfig;
use crate::error::SourceError;
use crate::model::{Advisory, Evidence, Finding, FindingKind, Severity};
use crate::sources::VulnDbClient;

pub struct VulnerabilityDetector {
    client: Arc<dyn VulnDbClient>,
    ecosystem: String,
    ignore: IgnoreConfig,
}

impl VulnerabilityDetector {
    pub fn new(client: Arc<dyn VulnDbClient>, ecosystem: impl Into<String>, ignore: IgnoreConfig) -> Self {
        Self {
            client,
            ecosystem: ecosystem.into(),
            ignore,
        }
    }
}

#[async_trait]
impl Detector for VulnerabilityDetector {
    fn name(&self) -> &'static str {
        "vulnerability"
    }

    fn description(&self) -> &'static str {
        "Known advisories for the resolved version"
    }

    fn requirement(&self) -> Requirement {
        Requirement::None
    }

    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
        let package = &input.package;
        let advisories = self
            .client
            .query(&self.ecosystem, &package.name, &package.version)
            .await?;

        let findings = advisories
            .into_iter()
            .filter(|a| !self.ignore.should_ignore_advisory(&a.id, &a.aliases))
            .map(|advisory| {
                let severity = advisory_severity(&advisory);
                let summary = advisory
                    .summary
                    .as_deref()
                    .unwrap_or("no summary published");
                let mut aliases = advisory.aliases.clone();
                aliases.sort();

                Finding::new(
                    package,
                    self.name(),
                    FindingKind::KnownVulnerability,
                    severity,
                    format!("{}: {}", advisory.id, summary),
                )
                .with_evidence(Evidence::Advisory {
                    id: advisory.id,
                    aliases,
                    fixed_version: advisory.fixed_version,
                    url: advisory.reference_url,
                })
            })
            .collect();

        Ok(findings)
    }
}

/// Severity of an advisory, clamped to the five-level scale.
///
/// Understands labels ("HIGH", "moderate"), numeric CVSS scores and CVSS
/// vectors. Anything unrecognized, or no severity at all, is `Medium`.
pub fn advisory_severity(advisory: &Advisory) -> Severity {
    advisory
        .severity
        .as_deref()
        .and_then(|s| Severity::from_label(s).or_else(|| parse_cvss_score(s)))
        .unwrap_or(Severity::Medium)
}

/// Parses CVSS score into a severity level.
///
/// Supports both numeric scores and CVSS vector strings.
pub fn parse_cvss_score(score: &str) -> Option<Severity> {
    let score = score.trim();
    if let Ok(cvss) = score.parse::<f32>() {
        return match cvss {
            s if s >= 9.0 => Some(Severity::Critical),
            s if s >= 7.0 => Some(Severity::High),
            s if s >= 4.0 => Some(Severity::Medium),
            s if s > 0.0 => Some(Severity::Low),
            s if s == 0.0 => Some(Severity::Info),
            _ => None,
        };
    }

    if score.contains("CVSS:") {
        // Impact metrics only; the base score formula is not reproduced.
        if score.contains("/C:H") || score.contains("/I:H") || score.contains("/A:H") {
            return Some(Severity::High);
        }
        if score.contains("/C:L") || score.contains("/I:L") || score.contains("/A:L") {
            return Some(Severity::Medium);
        }
        return Some(Severity::Low);
    }

    None
}
