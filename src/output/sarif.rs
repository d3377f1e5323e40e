//! SARIF (Static Analysis Results Interchange Format) output for GitHub Actions integration.
//!
//! When used with `--format sarif`, the output can be uploaded to GitHub Code Scanning.
//! Each finding kind becomes a rule and each finding becomes a result located
//! at the package it was reported on.

use crate::model::{FindingKind, ScanReport, Severity};
use anyhow::Result;
use serde::Serialize;

/// SARIF v2.1.0 schema root
#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    invocations: Vec<SarifInvocation>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
struct SarifRule {
    id: &'static str,
    name: &'static str,
    #[serde(rename = "shortDescription")]
    short_description: SarifMessage,
    #[serde(rename = "defaultConfiguration")]
    default_configuration: SarifRuleConfiguration,
}

#[derive(Serialize)]
struct SarifRuleConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: &'static str,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: SarifArtifactLocation,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

/// Execution errors surface as tool notifications, not results.
#[derive(Serialize)]
struct SarifInvocation {
    #[serde(rename = "executionSuccessful")]
    execution_successful: bool,
    #[serde(rename = "toolExecutionNotifications")]
    tool_execution_notifications: Vec<SarifNotification>,
}

#[derive(Serialize)]
struct SarifNotification {
    level: &'static str,
    message: SarifMessage,
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}

fn rule_level(kind: FindingKind) -> &'static str {
    match kind {
        FindingKind::KnownVulnerability
        | FindingKind::IntegrityMismatch
        | FindingKind::SuspiciousScript => "error",
        FindingKind::Typosquat | FindingKind::MetadataAnomaly => "warning",
    }
}

fn rule_description(kind: FindingKind) -> &'static str {
    match kind {
        FindingKind::KnownVulnerability => "Package version is affected by a published advisory",
        FindingKind::Typosquat => "Package name is suspiciously close to a popular package",
        FindingKind::IntegrityMismatch => {
            "Installed artifact cannot be matched to the registry's published digest"
        }
        FindingKind::MetadataAnomaly => "Publication history shows a takeover or injection pattern",
        FindingKind::SuspiciousScript => "Install-time lifecycle script runs suspicious commands",
    }
}

pub fn render_sarif(report: &ScanReport) -> Result<String> {
    let rules = FindingKind::ALL
        .iter()
        .filter(|kind| report.findings().any(|f| f.kind == **kind))
        .map(|&kind| SarifRule {
            id: kind.as_str(),
            name: kind.display_name(),
            short_description: SarifMessage {
                text: rule_description(kind).to_string(),
            },
            default_configuration: SarifRuleConfiguration {
                level: rule_level(kind),
            },
        })
        .collect();

    let results = report
        .findings()
        .map(|finding| SarifResult {
            rule_id: finding.kind.as_str(),
            level: severity_to_sarif_level(finding.severity),
            message: SarifMessage {
                text: format!(
                    "{} {} in {}: {}",
                    finding.severity.as_str(),
                    finding.kind.display_name().to_lowercase(),
                    finding.package.key(),
                    finding.description
                ),
            },
            locations: vec![SarifLocation {
                physical_location: SarifPhysicalLocation {
                    artifact_location: SarifArtifactLocation {
                        uri: finding.package.key(),
                    },
                },
            }],
        })
        .collect();

    let invocations = if report.errors.is_empty() {
        Vec::new()
    } else {
        vec![SarifInvocation {
            execution_successful: true,
            tool_execution_notifications: report
                .errors
                .iter()
                .map(|e| SarifNotification {
                    level: "warning",
                    message: SarifMessage {
                        text: format!("{}: {}", e.source, e.message),
                    },
                })
                .collect(),
        }]
    };

    let sarif = SarifReport {
        schema: "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        version: "2.1.0",
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "zerotrust-scan",
                    version: env!("CARGO_PKG_VERSION"),
                    rules,
                },
            },
            results,
            invocations,
        }],
    };

    Ok(serde_json::to_string_pretty(&sarif)?)
}
