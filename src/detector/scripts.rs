use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::{Detector, DetectorInput, Requirement};
use crate::config::ScriptConfig;
use crate::error::{ConfigError, SourceError};
use crate::model::{Evidence, Finding, FindingKind, Severity, LIFECYCLE_SCRIPTS};

/// Built-in patterns as (label, regex). Matched case-insensitively.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    ("network-fetch", r"\b(curl|wget|fetch)\b"),
    ("raw-socket", r"\b(nc|ncat|netcat|socat)\b"),
    ("remote-url", r#"\bhttps?://[^\s'"|;&]+"#),
    ("pipe-to-shell", r"\|\s*(sudo\s+)?(sh|bash|zsh|dash|ksh)\b"),
    ("shell-eval", r"\beval\b"),
    ("inline-interpreter", r"\b(node|python[0-9.]*|perl|ruby)\s+-(e|c)\b"),
    ("child-process", r"child_process"),
    ("base64-decode", r"\bbase64\s+(-d|--decode)\b"),
    ("encoded-payload", r"\b(atob|Buffer\.from)\s*\("),
    ("hex-escapes", r"(\\x[0-9a-f]{2}){4,}"),
    ("long-base64-blob", r"[a-z0-9+/]{100,}={0,2}"),
    ("powershell", r"\b(powershell|pwsh)\b"),
];

/// Install script npm infers for packages that ship a `binding.gyp`.
const IMPLICIT_GYP_INSTALL: &str = "node-gyp rebuild";

/// A labelled, compiled script pattern.
#[derive(Debug, Clone)]
pub struct ScriptPattern {
    pub label: String,
    regex: Regex,
}

impl ScriptPattern {
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::Pattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            label: label.into(),
            regex,
        })
    }

    pub fn find<'a>(&self, command: &'a str) -> Option<&'a str> {
        self.regex.find(command).map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

pub fn default_patterns() -> Vec<ScriptPattern> {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(label, pattern)| ScriptPattern::new(*label, pattern).ok())
        .collect()
}

/// Where a lifecycle script was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Manifest,
    Local,
}

pub struct ScriptAuditDetector {
    patterns: Vec<ScriptPattern>,
}

impl ScriptAuditDetector {
    pub fn new(patterns: Vec<ScriptPattern>) -> Self {
        Self { patterns }
    }

    pub fn from_config(config: &ScriptConfig) -> Result<Self, ConfigError> {
        let mut patterns = if config.use_default_patterns {
            default_patterns()
        } else {
            Vec::new()
        };
        for pattern in &config.patterns {
            patterns.push(ScriptPattern::new(format!("custom:{}", pattern), pattern)?);
        }
        Ok(Self::new(patterns))
    }

    pub fn patterns(&self) -> &[ScriptPattern] {
        &self.patterns
    }

    /// Audits one script command. Pure: no I/O.
    fn audit(
        &self,
        input: &DetectorInput,
        script: &str,
        command: &str,
        origin: Origin,
    ) -> Vec<Finding> {
        let origin_note = match origin {
            Origin::Manifest => "",
            Origin::Local => " (installed copy)",
        };

        let findings: Vec<Finding> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                let matched = pattern.find(command)?;
                Some(
                    Finding::new(
                        &input.package,
                        self.name(),
                        FindingKind::SuspiciousScript,
                        Severity::High,
                        format!("{} script{} matches {}: {}", script, origin_note, pattern.label, matched),
                    )
                    .with_evidence(Evidence::ScriptMatch {
                        script: script.to_string(),
                        pattern: pattern.label.clone(),
                        matched: matched.to_string(),
                    }),
                )
            })
            .collect();

        if !findings.is_empty() {
            return findings;
        }

        vec![Finding::new(
            &input.package,
            self.name(),
            FindingKind::SuspiciousScript,
            Severity::Info,
            format!("{} script{} present, no pattern matched", script, origin_note),
        )
        .with_evidence(Evidence::Note {
            text: command.to_string(),
        })]
    }
}

#[async_trait]
impl Detector for ScriptAuditDetector {
    fn name(&self) -> &'static str {
        "scripts"
    }

    fn description(&self) -> &'static str {
        "Install-time lifecycle scripts against dangerous command patterns"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Either
    }

    async fn evaluate(&self, input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
        let declared = input.metadata.as_deref().map(|m| &m.scripts);
        let local = input.artifact.as_deref().map(|a| &a.scripts);

        // The same command in both places is audited once.
        let mut commands: BTreeMap<(&str, &str), Origin> = BTreeMap::new();
        for (origin, scripts) in [(Origin::Manifest, declared), (Origin::Local, local)] {
            let Some(scripts) = scripts else { continue };
            for name in LIFECYCLE_SCRIPTS {
                if let Some(command) = scripts.get(name).filter(|c| !c.trim().is_empty()) {
                    commands.entry((name, command.as_str())).or_insert(origin);
                }
            }
        }

        let mut findings: Vec<Finding> = commands
            .iter()
            .flat_map(|(&(script, command), &origin)| self.audit(input, script, command, origin))
            .collect();

        // An empty local map means the installed manifest was not read.
        if let (Some(declared), Some(local)) = (declared, local.filter(|l| !l.is_empty())) {
            for name in LIFECYCLE_SCRIPTS {
                match (declared.get(name), local.get(name)) {
                    (Some(a), Some(b)) if a.trim() == b.trim() => {}
                    (None, None) => {}
                    // The registry adds `install: node-gyp rebuild` for packages with a
                    // binding.gyp; the installed package.json never carries it.
                    (Some(a), None) if name == "install" && a.trim() == IMPLICIT_GYP_INSTALL => {}
                    (published, installed) => {
                        findings.push(
                            Finding::new(
                                &input.package,
                                self.name(),
                                FindingKind::SuspiciousScript,
                                Severity::Medium,
                                format!("installed {} script differs from the published manifest", name),
                            )
                            .with_evidence(Evidence::Note {
                                text: format!(
                                    "published: {}; installed: {}",
                                    published.map(String::as_str).unwrap_or("<none>"),
                                    installed.map(String::as_str).unwrap_or("<none>")
                                ),
                            }),
                        );
                    }
                }
            }
        }

        Ok(findings)
    }
}
