//! npm project reader.
//!
//! Resolves a project directory into its dependency set, preferring the most
//! exact source available:
//!
//! 1. `package-lock.json` (v2/v3 `packages` map, or the nested v1 `dependencies` map)
//! 2. the installed `node_modules/` tree (including `@scope/` directories)
//! 3. `package.json` declared versions with `^`/`~` stripped
//!
//! Alongside the package list it records what is known locally about every
//! package (integrity digest and install scripts) in a [`LocalArtifactIndex`].

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest as _, Sha512};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::DependencyGraphProvider;
use crate::error::SourceError;
use crate::model::{Digest, DigestAlgorithm, LocalArtifact, PackageRef};

/// Local facts per `name@version`. A failed hash computation is kept as the
/// error so the lookup reports it instead of a plain miss.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactIndex {
    entries: HashMap<String, Result<LocalArtifact, SourceError>>,
}

impl LocalArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: &PackageRef, artifact: Result<LocalArtifact, SourceError>) {
        self.entries.entry(package.key()).or_insert(artifact);
    }

    /// Fails with `FileMissing` when nothing is known locally about `package`.
    pub fn get(&self, package: &PackageRef) -> Result<LocalArtifact, SourceError> {
        self.entries
            .get(&package.key())
            .cloned()
            .unwrap_or_else(|| Err(SourceError::FileMissing(package.key())))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How the package list of a project was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    Lockfile,
    NodeModules,
    Manifest,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Lockfile => "package-lock.json",
            ResolutionMethod::NodeModules => "node_modules",
            ResolutionMethod::Manifest => "package.json",
        }
    }
}

/// One npm project, resolved.
#[derive(Debug, Clone)]
pub struct NpmProject {
    root: PathBuf,
    method: ResolutionMethod,
    packages: Vec<PackageRef>,
    artifacts: LocalArtifactIndex,
}

#[derive(Deserialize, Default)]
struct Manifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(rename = "_integrity")]
    integrity: Option<String>,
}

impl Manifest {
    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn requested(&self, name: &str) -> Option<&String> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
    }
}

#[derive(Deserialize)]
struct Lockfile {
    #[serde(default)]
    packages: BTreeMap<String, LockEntry>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

#[derive(Deserialize)]
struct LockEntry {
    name: Option<String>,
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    link: bool,
}

#[derive(Deserialize)]
struct LockDependency {
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

/// Accumulates packages, keeping the first occurrence of every `name@version`.
struct Collector<'a> {
    root: &'a Path,
    registry_url: &'a str,
    manifest: &'a Manifest,
    packages: BTreeMap<(String, String), PackageRef>,
    artifacts: LocalArtifactIndex,
}

impl<'a> Collector<'a> {
    fn new(root: &'a Path, registry_url: &'a str, manifest: &'a Manifest) -> Self {
        Self {
            root,
            registry_url,
            manifest,
            packages: BTreeMap::new(),
            artifacts: LocalArtifactIndex::new(),
        }
    }

    fn add(
        &mut self,
        name: &str,
        version: &str,
        resolved: Option<&str>,
        integrity: Option<&str>,
        install_dir: Option<PathBuf>,
    ) {
        let key = (name.to_string(), version.to_string());
        if self.packages.contains_key(&key) {
            return;
        }

        let source = resolved
            .and_then(registry_origin)
            .unwrap_or_else(|| self.registry_url.to_string());
        let mut package = PackageRef::new(name, version, source);
        if let Some(range) = self.manifest.requested(name) {
            package = package.with_requested(range.clone());
        }

        let artifact = self.local_artifact(resolved, integrity, install_dir);
        self.artifacts.insert(&package, artifact);
        self.packages.insert(key, package);
    }

    fn local_artifact(
        &self,
        resolved: Option<&str>,
        integrity: Option<&str>,
        install_dir: Option<PathBuf>,
    ) -> Result<LocalArtifact, SourceError> {
        let installed = install_dir
            .map(|dir| dir.join("package.json"))
            .filter(|path| path.is_file())
            .and_then(|path| Manifest::read(&path).ok());

        let mut digest = integrity
            .or_else(|| installed.as_ref().and_then(|m| m.integrity.as_deref()))
            .and_then(Digest::parse);

        if digest.is_none() {
            if let Some(tarball) = resolved.and_then(|r| r.strip_prefix("file:")) {
                let path = self.root.join(tarball);
                if path.is_file() {
                    digest = Some(tarball_digest(&path)?);
                }
            }
        }

        Ok(LocalArtifact {
            digest,
            scripts: installed.map(|m| m.scripts).unwrap_or_default(),
        })
    }

    fn finish(self) -> (Vec<PackageRef>, LocalArtifactIndex) {
        (self.packages.into_values().collect(), self.artifacts)
    }
}

impl NpmProject {
    /// Resolves the project rooted at `root`. Fails only when `root` has no
    /// usable `package.json`, `package-lock.json` or `node_modules/`.
    pub fn open(root: &Path, registry_url: &str) -> Result<Self> {
        let manifest_path = root.join("package.json");
        let lockfile_path = root.join("package-lock.json");
        let node_modules = root.join("node_modules");

        let manifest = if manifest_path.is_file() {
            Manifest::read(&manifest_path)?
        } else {
            Manifest::default()
        };
        let mut collector = Collector::new(root, registry_url, &manifest);

        let method = if lockfile_path.is_file() {
            read_lockfile(&lockfile_path, &mut collector)?;
            ResolutionMethod::Lockfile
        } else if node_modules.is_dir() {
            read_node_modules(&node_modules, &mut collector)?;
            ResolutionMethod::NodeModules
        } else if manifest_path.is_file() {
            read_manifest(&manifest, &mut collector);
            ResolutionMethod::Manifest
        } else {
            anyhow::bail!(
                "{} has no package.json, package-lock.json or node_modules",
                root.display()
            );
        };

        let (packages, artifacts) = collector.finish();
        tracing::info!(
            project = %root.display(),
            method = method.as_str(),
            packages = packages.len(),
            "Resolved project dependencies"
        );

        Ok(Self {
            root: root.to_path_buf(),
            method,
            packages,
            artifacts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn method(&self) -> ResolutionMethod {
        self.method
    }

    pub fn artifacts(&self) -> &LocalArtifactIndex {
        &self.artifacts
    }

    pub fn into_parts(self) -> (Vec<PackageRef>, LocalArtifactIndex) {
        (self.packages, self.artifacts)
    }
}

impl DependencyGraphProvider for NpmProject {
    fn packages(&self) -> Result<Vec<PackageRef>> {
        Ok(self.packages.clone())
    }
}

fn read_lockfile(path: &Path, collector: &mut Collector<'_>) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let lock: Lockfile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let root = collector.root;
    if !lock.packages.is_empty() {
        for (install_path, entry) in &lock.packages {
            if install_path.is_empty() || entry.link {
                continue;
            }
            let Some(version) = entry.version.as_deref() else {
                continue;
            };
            let name = entry
                .name
                .as_deref()
                .or_else(|| install_path.rsplit("node_modules/").next())
                .unwrap_or(install_path);
            collector.add(
                name,
                version,
                entry.resolved.as_deref(),
                entry.integrity.as_deref(),
                Some(root.join(install_path)),
            );
        }
        return Ok(());
    }

    read_lock_dependencies(&lock.dependencies, &root.join("node_modules"), collector);
    Ok(())
}

fn read_lock_dependencies(
    dependencies: &BTreeMap<String, LockDependency>,
    modules_dir: &Path,
    collector: &mut Collector<'_>,
) {
    for (name, dep) in dependencies {
        let install_dir = modules_dir.join(name);
        if let Some(version) = dep.version.as_deref() {
            collector.add(
                name,
                version,
                dep.resolved.as_deref(),
                dep.integrity.as_deref(),
                Some(install_dir.clone()),
            );
        }
        read_lock_dependencies(&dep.dependencies, &install_dir.join("node_modules"), collector);
    }
}

fn read_node_modules(dir: &Path, collector: &mut Collector<'_>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut package_dirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !path.is_dir() || file_name.starts_with('.') {
            continue;
        }
        if file_name.starts_with('@') {
            if let Ok(scoped) = fs::read_dir(&path) {
                package_dirs.extend(scoped.flatten().map(|e| e.path()).filter(|p| p.is_dir()));
            }
        } else {
            package_dirs.push(path);
        }
    }
    package_dirs.sort();

    for package_dir in package_dirs {
        let Ok(manifest) = Manifest::read(&package_dir.join("package.json")) else {
            tracing::debug!(path = %package_dir.display(), "Skipping directory without package.json");
            continue;
        };
        if let (Some(name), Some(version)) = (manifest.name.as_deref(), manifest.version.as_deref()) {
            collector.add(name, version, None, None, Some(package_dir.clone()));
        }
    }
    Ok(())
}

fn read_manifest(manifest: &Manifest, collector: &mut Collector<'_>) {
    for (name, range) in manifest.dependencies.iter().chain(&manifest.dev_dependencies) {
        match plain_version(range) {
            Some(version) => collector.add(name, &version, None, None, None),
            None => tracing::debug!(package = %name, range = %range, "Skipping non-exact version range"),
        }
    }
}

/// `^1.2.3` / `~1.2.3` / `1.2.3` → `1.2.3`; anything else (`*`, `>=1`, URLs,
/// git specs, tags) → `None`.
fn plain_version(range: &str) -> Option<String> {
    let stripped = range.trim().trim_start_matches(['^', '~']);
    semver::Version::parse(stripped).ok().map(|v| v.to_string())
}

/// `https://registry.npmjs.org/a/-/a-1.0.0.tgz` → `https://registry.npmjs.org`.
fn registry_origin(resolved: &str) -> Option<String> {
    let rest = resolved
        .strip_prefix("https://")
        .map(|r| ("https://", r))
        .or_else(|| resolved.strip_prefix("http://").map(|r| ("http://", r)))?;
    let host = rest.1.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("{}{}", rest.0, host))
}

/// SHA-512 SRI digest of a tarball on disk.
pub fn tarball_digest(path: &Path) -> Result<Digest, SourceError> {
    let bytes = fs::read(path)
        .map_err(|e| SourceError::HashCompute(format!("{}: {}", path.display(), e)))?;
    let hash = Sha512::digest(&bytes);
    Ok(Digest::new(DigestAlgorithm::Sha512, STANDARD.encode(hash)))
}

/// Every directory below `root` that holds a `package.json`, skipping
/// `node_modules` and hidden directories.
pub fn find_projects(root: &Path) -> Vec<PathBuf> {
    let mut projects: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name == "node_modules" || name.starts_with('.'))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && entry.path().join("package.json").is_file())
        .map(|entry| entry.into_path())
        .collect();
    projects.sort();
    projects
}
