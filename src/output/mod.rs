mod cli;
mod json;
mod sarif;

pub use cli::render_table;
pub use json::render_json;
pub use sarif::render_sarif;

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::model::ScanReport;
use crate::sources::ReportSink;

/// Output format for scan reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
    /// SARIF format for GitHub Actions code scanning
    Sarif,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "sarif" => Ok(OutputFormat::Sarif),
            _ => Err(format!(
                "Unknown format: {}. Use 'table', 'json', or 'sarif'",
                s
            )),
        }
    }
}

/// Renders a report for the terminal.
pub fn format_report(report: &ScanReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(report)),
        OutputFormat::Json => render_json(report),
        OutputFormat::Sarif => render_sarif(report),
    }
}

/// Renders a report for a file. Tables carry terminal colors, so files get
/// JSON instead.
pub fn format_report_for_file(report: &ScanReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table | OutputFormat::Json => render_json(report),
        OutputFormat::Sarif => render_sarif(report),
    }
}

/// Prints reports to stdout.
pub struct StdoutSink {
    format: OutputFormat,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ReportSink for StdoutSink {
    fn emit(&self, report: &ScanReport) -> Result<()> {
        println!("{}", format_report(report, self.format)?);
        Ok(())
    }
}

/// Writes reports to a file, replacing any previous content.
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl ReportSink for FileSink {
    fn emit(&self, report: &ScanReport) -> Result<()> {
        let content = format_report_for_file(report, self.format)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write report to {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}

/// Two packages: one typosquat with a failed vulnerability lookup, one clean.
#[cfg(test)]
pub(crate) fn sample_report() -> ScanReport {
    use crate::engine::RiskAggregator;
    use crate::model::{
        ErrorKind, Evidence, ExecutionError, Finding, FindingKind, PackageRef, ScanStatus,
        Severity,
    };
    use chrono::TimeZone;

    let registry = "https://registry.npmjs.org";
    let squat = PackageRef::new("reqeusts", "1.0.0", registry);
    let clean = PackageRef::new("left-pad", "1.3.0", registry);
    let aggregator = RiskAggregator::default();

    let verdicts = vec![
        aggregator.verdict(
            squat.clone(),
            vec![
                Finding::new(
                    &squat,
                    "typosquat",
                    FindingKind::Typosquat,
                    Severity::High,
                    "'reqeusts' resembles popular package 'requests' (distance 1)",
                )
                .with_evidence(Evidence::SimilarName {
                    candidate: "requests".into(),
                    distance: 1,
                }),
                Finding::new(
                    &squat,
                    "scripts",
                    FindingKind::SuspiciousScript,
                    Severity::High,
                    "postinstall script matches 'pipe-to-shell'",
                ),
            ],
            vec![ExecutionError {
                source: "vulnerability".into(),
                package: Some(squat.key()),
                detector: Some("vulnerability".into()),
                kind: ErrorKind::ExternalSource,
                message: "network error: connection refused".into(),
            }],
        ),
        aggregator.verdict(clean, vec![], vec![]),
    ];
    let errors = verdicts.iter().flat_map(|v| v.errors.clone()).collect();
    let project = aggregator.summarize(&verdicts);
    let at = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    ScanReport {
        started_at: at,
        finished_at: at,
        status: ScanStatus::Completed,
        detectors: vec!["vulnerability".into(), "typosquat".into(), "scripts".into()],
        verdicts,
        project,
        errors,
    }
}
