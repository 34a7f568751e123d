//! Engine: drives the walk, wires per-file processor pipelines, and
//! commits rewrites.
//!
//! For every `(path, pattern-key)` the walker yields, the engine reads the
//! file into memory and stacks the pattern's processors as a chain of
//! in-memory pipes: the first processor reads the original bytes, each
//! subsequent one reads its predecessor's output, and the engine drains
//! the last reader. One task runs per processor; back-pressure comes from
//! the bounded pipes. Files are processed sequentially.
//!
//! On `update` (and not dry-run) a changed file is committed with an
//! atomic temp-file-and-rename; `check` and `scan` never rewrite.

use anyhow::Context;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::VbumpError;
use crate::lockfile::Locks;
use crate::processor::{self, Change};
use crate::source::{self, Cache};
use crate::utils::fs::atomic_replace;
use crate::walker::Walker;

/// Pipe capacity between chained processors.
const PIPE_CAPACITY: usize = 64 * 1024;

/// What a run does with the versions it resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Report drift; never rewrite.
    Check,
    /// Snapshot file contents into the lock store; no upstream queries.
    Scan,
    /// Rewrite files and record locks.
    Update,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Scan => "scan",
            Self::Update => "update",
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Report changes without rewriting files or saving locks.
    pub dry_run: bool,
    /// When non-empty, only these processors run.
    pub processors: Vec<String>,
    /// Root paths to walk; empty means the current directory.
    pub paths: Vec<String>,
}

/// The assembled core: config, lock store, provider caches, cancellation.
pub struct Engine {
    conf: Arc<Config>,
    locks: Arc<Locks>,
    cache: Arc<Cache>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(conf: Arc<Config>, locks: Arc<Locks>, cancel: CancellationToken) -> Self {
        Self {
            conf,
            locks,
            cache: Arc::new(Cache::new()),
            cancel,
        }
    }

    /// Walk the configured paths and run `action` over every matching
    /// file. Returns all changes in walk order.
    pub async fn run(&self, action: Action, opts: &Options) -> anyhow::Result<Vec<Change>> {
        source::validate(&self.conf)?;
        debug!(action = action.as_str(), dry_run = opts.dry_run, "starting run");
        let walker = Walker::new(&opts.paths, &self.conf.files)?;
        let mut changes = Vec::new();
        for item in walker {
            let (filename, file_key) = item?;
            println!("processing file: {filename} for config {file_key}");
            info!(file = %filename, pattern = %file_key, "processing file");
            let file_changes = self
                .process_file(action, opts, &filename, &file_key)
                .await?;
            changes.extend(file_changes);
        }
        Ok(changes)
    }

    /// Run one file through its processor pipeline and commit the result.
    async fn process_file(
        &self,
        action: Action,
        opts: &Options,
        filename: &str,
        file_key: &str,
    ) -> anyhow::Result<Vec<Change>> {
        let orig = tokio::fs::read(filename)
            .await
            .map_err(|e| VbumpError::io(filename, e))?;

        // build the processor list up front so a dangling reference fails
        // the file before any task spawns
        let entry = &self.conf.files[file_key];
        let mut to_run = Vec::new();
        for name in &entry.processors {
            if !opts.processors.is_empty() && !opts.processors.contains(name) {
                continue;
            }
            if !self.conf.processors.contains_key(name) {
                return Err(anyhow::Error::from(VbumpError::MissingReference {
                    kind: "processor",
                    name: name.clone(),
                })
                .context(format!(
                    "missing processor config: {name}, file config: {file_key}, reading file: {filename}"
                )));
            }
            to_run.push(name.clone());
        }
        if to_run.is_empty() {
            return Ok(Vec::new());
        }

        // chain processors with pipes; each one runs on its own task
        let mut reader: Box<dyn AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(orig.clone()));
        let mut handles = Vec::with_capacity(to_run.len());
        for name in to_run {
            let (next_reader, writer) = tokio::io::simplex(PIPE_CAPACITY);
            eprintln!("DEBUG spawning {name}");
            let task = processor::process(
                self.conf.clone(),
                name.clone(),
                filename.to_string(),
                reader,
                writer,
                self.locks.clone(),
                self.cache.clone(),
                action,
                self.cancel.clone(),
            );
            handles.push((name, tokio::spawn(task)));
            reader = Box::new(next_reader);
        }

        eprintln!("DEBUG about to read_to_end final");
        let mut final_bytes = Vec::with_capacity(orig.len());
        reader
            .read_to_end(&mut final_bytes)
            .await
            .with_context(|| format!("failed scanning file \"{filename}\""))?;
        eprintln!("DEBUG read_to_end final done");

        // collect every processor's outcome; the union of errors fails the
        // file and suppresses the rewrite
        let mut changes = Vec::new();
        let mut errors = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(proc_changes)) => changes.extend(proc_changes),
                Ok(Err(e)) => errors.push(e),
                Err(join) => errors.push(anyhow::anyhow!("processor {name} panicked: {join}")),
            }
        }
        if !errors.is_empty() {
            let combined = errors
                .iter()
                .map(|e| format!("{e:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(anyhow::anyhow!(combined)
                .context(format!("processing failed for {filename}")));
        }

        if action == Action::Update && !opts.dry_run && final_bytes != orig {
            debug!(file = %filename, "writing updated file");
            atomic_replace(std::path::Path::new(filename), &final_bytes)?;
        }
        Ok(changes)
    }
}
