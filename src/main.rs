use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zerotrust_scan::{
    cache::Cache,
    config::Config,
    detector::standard_detectors,
    engine::{Orchestrator, ProjectScan, TokenBucket},
    model::{Classification, ScanReport},
    output::{FileSink, OutputFormat, StdoutSink},
    similarity::SimilarityIndex,
    sources::{
        find_projects, DependencyGraphProvider, NpmProject, NpmRegistry, OsvClient, ReportSink,
    },
};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const POLICY_FAILED: u8 = 2;
}

#[derive(Parser)]
#[command(name = "zerotrust-scan")]
#[command(
    author,
    version,
    about = "Audit npm dependency trees for supply-chain risk"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an npm project
    Scan {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Scan every npm project below PATH
        #[arg(short, long)]
        recursive: bool,

        /// Output format (table, json, sarif)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit with code 2 if the project verdict is at or above this level
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,

        /// Reuse registry and advisory responses cached on disk by earlier runs
        #[arg(long)]
        offline_cache: bool,

        /// Clear cache before scanning
        #[arg(long)]
        clear_cache: bool,

        /// Maximum number of checks in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Deadline for the whole scan, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the cache
    ClearCache,

    /// List the detectors and what each checks
    Detectors,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Fail,
    Warn,
    Unknown,
}

impl FailLevel {
    fn classification(self) -> Classification {
        match self {
            FailLevel::Fail => Classification::Fail,
            FailLevel::Warn => Classification::Warn,
            FailLevel::Unknown => Classification::Unknown,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

/// Logs go to stderr so stdout stays clean for reports. `RUST_LOG` overrides
/// the configured level.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(e) = result {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config);

    match cli.command {
        Commands::Scan {
            path,
            recursive,
            format,
            output,
            fail_on,
            offline_cache,
            clear_cache,
            concurrency,
            timeout,
        } => {
            let mut config = config;
            if offline_cache {
                config.use_cache = true;
            }
            if let Some(n) = concurrency {
                config.engine.max_concurrency = n;
            }
            if let Some(secs) = timeout {
                config.engine.scan_timeout_secs = secs;
                config.engine.task_timeout_secs = config.engine.task_timeout_secs.min(secs);
            }
            if clear_cache {
                let removed = Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
                tracing::info!(removed, "Cache cleared");
            }

            let format_str = format.unwrap_or_else(|| config.default_format.clone());
            let format = OutputFormat::from_str(&format_str).map_err(|e| anyhow::anyhow!(e))?;

            run_scan(config, &path, recursive, format, output, fail_on).await
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let removed = Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
            println!("Cache cleared ({} entries).", removed);
            Ok(exit_codes::SUCCESS)
        }
        Commands::Detectors => {
            list_detectors(&config)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

/// Resolves one project, or every project below `root` when `recursive`.
/// Each project keeps its own artifact index, so installed copies of the
/// same `name@version` in different projects are checked separately.
fn resolve_projects(root: &Path, recursive: bool, config: &Config) -> Result<Vec<ProjectScan>> {
    let roots = if recursive {
        find_projects(root)
    } else {
        vec![root.to_path_buf()]
    };
    if roots.is_empty() {
        anyhow::bail!("No npm projects found below {}", root.display());
    }

    let downloads_limiter = Arc::new(TokenBucket::new(
        "downloads",
        config.engine.per_source_rate_limit,
    ));
    let mut projects = Vec::with_capacity(roots.len());
    for project_root in &roots {
        let project = NpmProject::open(project_root, &config.registry_url)
            .with_context(|| format!("Failed to read project at {}", project_root.display()))?;
        let packages = project.packages()?;
        let (_, artifacts) = project.into_parts();

        let mut registry = NpmRegistry::new(config.registry_url.clone(), artifacts)
            .with_downloads_limiter(Arc::clone(&downloads_limiter));
        if config.use_cache {
            registry = registry.with_cache(Cache::with_ttl_hours(config.cache_ttl_hours));
        }
        projects.push(ProjectScan {
            name: project_root.display().to_string(),
            registry: Arc::new(registry),
            packages,
        });
    }
    Ok(projects)
}

async fn run_scan(
    config: Config,
    path: &Path,
    recursive: bool,
    format: OutputFormat,
    output_file: Option<PathBuf>,
    fail_on: Option<FailLevel>,
) -> Result<u8> {
    let is_interactive = format == OutputFormat::Table && output_file.is_none();
    let projects = resolve_projects(path, recursive, &config)?;
    let total: usize = projects.iter().map(|p| p.packages.len()).sum();

    let mut osv = OsvClient::new(config.osv_url.clone());
    if config.use_cache {
        osv = osv.with_cache(Cache::with_ttl_hours(config.cache_ttl_hours));
    }

    let default_registry = projects
        .first()
        .map(|p| Arc::clone(&p.registry))
        .context("No npm projects to scan")?;
    let orchestrator = Orchestrator::new(config, default_registry, Arc::new(osv))?;

    let progress = if is_interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Auditing {} packages...", total));
        Some(pb)
    } else {
        None
    };

    let report = orchestrator.run_projects(projects).await?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    match &output_file {
        Some(path) => {
            FileSink::new(path, format).emit(&report)?;
            if format == OutputFormat::Table {
                println!("Results written to: {}", path.display());
            }
        }
        None => StdoutSink::new(format).emit(&report)?,
    }

    Ok(determine_exit_code(&report, fail_on))
}

/// Exit code 2 when the project verdict ranks at or above `--fail-on`.
fn determine_exit_code(report: &ScanReport, fail_on: Option<FailLevel>) -> u8 {
    let Some(level) = fail_on else {
        return exit_codes::SUCCESS;
    };
    if report.project.classification.rank() >= level.classification().rank() {
        exit_codes::POLICY_FAILED
    } else {
        exit_codes::SUCCESS
    }
}

fn list_detectors(config: &Config) -> Result<()> {
    let index = SimilarityIndex::bundled(config.typosquat.max_distance());
    let detectors = standard_detectors(
        config,
        Arc::new(index),
        Arc::new(OsvClient::new(config.osv_url.clone())),
    )?;

    println!("Detectors:");
    println!();
    for detector in detectors {
        println!("  {:<14} {}", detector.name(), detector.description());
    }
    Ok(())
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'zerotrust-scan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
