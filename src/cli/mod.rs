//! Command-line interface.
//!
//! Subcommands:
//! - `check` - compare file versions to their upstreams, exit non-zero on
//!   drift
//! - `scan` - snapshot file versions into the lock file
//! - `update` - rewrite files from upstreams and save the lock file
//! - `version` - print build info, formatted by a template
//!
//! The run subcommands share the same flags: `--chdir` (defaults to the
//! config file's directory), `--conf/-c`, `--dry-run`, `--prune`
//! (defaults to true when no path arguments are given), and repeatable
//! `--processor` restrictions. Config and lock paths honor the
//! `VERSION_BUMP_CONF` / `VERSION_BUMP_LOCK` environment overrides.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::VbumpError;
use crate::engine::{Action, Engine, Options};
use crate::lockfile::Locks;
use crate::template;
use crate::version;

const DEFAULT_CONF: &str = ".version-bump.yml";
const ENV_CONF: &str = "VERSION_BUMP_CONF";
const ENV_LOCK: &str = "VERSION_BUMP_LOCK";

/// Version and pinning management tool.
#[derive(Debug, Parser)]
#[command(
    name = "vbump",
    about = "Version and pinning management tool",
    long_about = "vbump updates versions embedded in various files of your project"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check versions in files compared to sources
    Check(RunArgs),
    /// Scan versions from files into the lock file
    Scan(RunArgs),
    /// Update versions in files using upstream sources
    Update(RunArgs),
    /// Show the version
    Version(VersionArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Files or directories to scan; defaults to the current directory
    paths: Vec<String>,

    /// Change to this directory first; defaults to the config file location
    #[arg(long)]
    chdir: Option<PathBuf>,

    /// Config file to load
    #[arg(short = 'c', long = "conf")]
    conf: Option<PathBuf>,

    /// Report changes without rewriting files or saving locks
    #[arg(long)]
    dry_run: bool,

    /// Prune unused lock entries (defaults to true when no paths are given)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    prune: Option<bool>,

    /// Only run specific processors (repeatable)
    #[arg(long = "processor")]
    processors: Vec<String>,

    /// Deprecated alias for --processor
    #[arg(long = "scan", hide = true)]
    scans: Vec<String>,
}

#[derive(Debug, Args)]
struct VersionArgs {
    /// Format the output with template syntax
    #[arg(long, default_value = version::DEFAULT_FORMAT)]
    format: String,
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        init_logging();
        match self.command {
            Commands::Check(args) => run_action(Action::Check, args).await,
            Commands::Scan(args) => run_action(Action::Scan, args).await,
            Commands::Update(args) => run_action(Action::Update, args).await,
            Commands::Version(args) => {
                let banner = template::render_data(&args.format, &version::info())?;
                println!("{banner}");
                Ok(())
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

async fn run_action(action: Action, mut args: RunArgs) -> Result<()> {
    if !args.scans.is_empty() {
        warn!("the --scan flag is deprecated, switch to --processor");
        eprintln!("warning: scan flag is deprecated, switch to processor");
        args.processors.append(&mut args.scans);
    }

    let conf_path = conf_path(args.conf.as_deref());
    let conf = Config::load_file(&conf_path)
        .with_context(|| format!("failed to load config {}", conf_path.display()))?;
    let lock_path = lock_path(&conf_path);
    let locks = Locks::load_file_or_default(&lock_path)
        .with_context(|| format!("failed to load lockfile {}", lock_path.display()))?;
    let prune = args.prune.unwrap_or(args.paths.is_empty());

    // run from the config file's directory unless told otherwise
    let chdir = args
        .chdir
        .clone()
        .unwrap_or_else(|| conf_path.parent().unwrap_or(Path::new(".")).to_path_buf());
    let orig_dir = if chdir.as_os_str().is_empty() || chdir == Path::new(".") {
        None
    } else {
        let orig = std::env::current_dir().context("unable to get current directory")?;
        std::env::set_current_dir(&chdir)
            .with_context(|| format!("unable to change directory to {}", chdir.display()))?;
        Some(orig)
    };

    let conf = Arc::new(conf);
    let locks = Arc::new(locks);
    let engine = Engine::new(conf, locks.clone(), CancellationToken::new());
    let opts = Options {
        dry_run: args.dry_run,
        processors: args.processors.clone(),
        paths: args.paths.clone(),
    };
    let changes = engine.run(action, &opts).await?;

    for change in &changes {
        println!(
            "Version changed: filename={}, processor={}, key={}, old={}, new={}",
            change.filename, change.processor, change.key, change.orig, change.new
        );
    }

    if let Some(orig) = orig_dir {
        std::env::set_current_dir(&orig)
            .with_context(|| format!("unable to change directory to {}", orig.display()))?;
    }

    if !args.dry_run {
        match action {
            Action::Scan | Action::Update => {
                locks
                    .save_file(&lock_path, prune)
                    .with_context(|| format!("failed to save lockfile {}", lock_path.display()))?;
            }
            Action::Check => {
                if !changes.is_empty() {
                    return Err(VbumpError::Drift.into());
                }
            }
        }
    }
    Ok(())
}

/// Resolve the config path: flag, then environment, then the default name.
fn conf_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(ENV_CONF).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONF)
}

/// Resolve the lock path: environment override, else the config path with
/// its extension replaced by `.lock`.
fn lock_path(conf_path: &Path) -> PathBuf {
    if let Some(path) = std::env::var_os(ENV_LOCK).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    conf_path.with_extension("lock")
}
