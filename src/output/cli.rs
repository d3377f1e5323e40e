use crate::model::{Classification, ScanReport, ScanStatus, Severity};
use std::fmt::Write;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VerdictRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Verdict")]
    classification: String,
    #[tabled(rename = "Score")]
    score: u32,
    #[tabled(rename = "Findings")]
    findings: usize,
    #[tabled(rename = "Errors")]
    errors: usize,
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct ErrorRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Verdicts that need attention, then findings, then execution errors, then
/// the project summary. Clean packages are only counted.
pub fn render_table(report: &ScanReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Scan finished at: {}",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if report.status == ScanStatus::TimedOut {
        let _ = writeln!(
            out,
            "{}",
            paint("Scan timed out: results are partial", "\x1b[33m")
        );
    }
    let _ = writeln!(out);

    if report.verdicts.is_empty() {
        let _ = writeln!(out, "No packages found.");
        return out;
    }

    let flagged: Vec<VerdictRow> = report
        .verdicts
        .iter()
        .filter(|v| v.classification != Classification::Pass)
        .map(|v| VerdictRow {
            package: truncate(&v.package.name, 40),
            version: v.package.version.clone(),
            classification: format_classification(v.classification),
            score: v.score,
            findings: v.findings.len(),
            errors: v.errors.len(),
        })
        .collect();

    if flagged.is_empty() {
        let _ = writeln!(out, "All {} packages passed.", report.verdicts.len());
    } else {
        let _ = writeln!(
            out,
            "{} of {} packages need attention:",
            flagged.len(),
            report.verdicts.len()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", Table::new(flagged).with(Style::rounded()));
    }

    let findings: Vec<FindingRow> = report
        .findings()
        .map(|f| FindingRow {
            severity: format_severity(f.severity),
            package: f.package.key(),
            kind: f.kind.display_name().to_string(),
            description: truncate(&f.description, 70),
        })
        .collect();
    if !findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Found {} findings:", findings.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", Table::new(findings).with(Style::rounded()));
    }

    if !report.errors.is_empty() {
        let rows: Vec<ErrorRow> = report
            .errors
            .iter()
            .map(|e| ErrorRow {
                source: e.source.clone(),
                package: e.package.clone().unwrap_or_else(|| "-".to_string()),
                kind: format!("{:?}", e.kind),
                message: truncate(&e.message, 60),
            })
            .collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "{} checks could not complete:", rows.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", Table::new(rows).with(Style::rounded()));
    }

    let _ = writeln!(out);
    render_summary(&mut out, report);
    out
}

fn render_summary(out: &mut String, report: &ScanReport) {
    let project = &report.project;
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total packages: {}", project.total_packages);
    let _ = writeln!(
        out,
        "  Verdicts: {} fail, {} warn, {} unknown, {} pass with notes, {} pass",
        report.count(Classification::Fail),
        report.count(Classification::Warn),
        report.count(Classification::Unknown),
        report.count(Classification::PassWithNotes),
        report.count(Classification::Pass),
    );

    let by_severity = |severity: Severity| report.findings().filter(|f| f.severity == severity).count();
    if project.total_findings > 0 {
        let _ = writeln!(
            out,
            "  Findings: {} critical, {} high, {} medium, {} low, {} info",
            by_severity(Severity::Critical),
            by_severity(Severity::High),
            by_severity(Severity::Medium),
            by_severity(Severity::Low),
            by_severity(Severity::Info),
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Project verdict: {} (max score {}/100)",
        format_classification(project.classification),
        project.max_score
    );
}

fn paint(text: &str, color: &str) -> String {
    format!("{}{}\x1b[0m", color, text)
}

fn format_classification(classification: Classification) -> String {
    match classification {
        Classification::Fail => paint("FAIL", "\x1b[31m"),
        Classification::Warn => paint("WARN", "\x1b[33m"),
        Classification::Unknown => paint("UNKNOWN", "\x1b[35m"),
        Classification::PassWithNotes => paint("PASS (notes)", "\x1b[32m"),
        Classification::Pass => paint("PASS", "\x1b[32m"),
    }
}

fn format_severity(severity: Severity) -> String {
    match severity {
        Severity::Critical => paint("CRITICAL", "\x1b[31m"),
        Severity::High => paint("HIGH", "\x1b[91m"),
        Severity::Medium => paint("MEDIUM", "\x1b[33m"),
        Severity::Low => paint("LOW", "\x1b[32m"),
        Severity::Info => "INFO".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sample_report;

    #[test]
    fn test_table_lists_flagged_packages_and_errors() {
        let table = render_table(&sample_report());

        assert!(table.contains("1 of 2 packages need attention"));
        assert!(table.contains("reqeusts"));
        assert!(table.contains("Found 2 findings"));
        assert!(table.contains("1 checks could not complete"));
        assert!(table.contains("connection refused"));
        assert!(table.contains("1 fail, 0 warn, 0 unknown, 0 pass with notes, 1 pass"));
        assert!(!table.contains("Scan timed out"));
    }

    #[test]
    fn test_table_flags_timed_out_scan() {
        let mut report = sample_report();
        report.status = ScanStatus::TimedOut;
        assert!(render_table(&report).contains("Scan timed out"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }
}
