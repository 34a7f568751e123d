//! Processor: one (scanner, source) binding applied to one file.
//!
//! A processor resolves its scanner and source by name, merges its
//! per-binding arg overrides over their base args, and then becomes the
//! scanner's resolve callback: per match it expands the source args and
//! key template against the match captures, queries the source (cached),
//! reduces the result through the selector, records the chosen version in
//! the lock store, and hands the version back to the scanner for splicing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, ProcessorEntry, ScanEntry, SourceEntry};
use crate::core::VbumpError;
use crate::engine::Action;
use crate::lockfile::Locks;
use crate::scanner::{self, Resolver};
use crate::select;
use crate::source::{self, Cache};
use crate::template;

/// One observed or applied version change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// File the version lives in.
    pub filename: String,
    /// Processor that produced the change.
    pub processor: String,
    /// Scan name the processor used.
    pub scan: String,
    /// Source name the processor used.
    pub source: String,
    /// Expanded lock key.
    pub key: String,
    /// Version found in the file.
    pub orig: String,
    /// Version the source resolved to.
    pub new: String,
}

/// Run one named processor over a file's byte stream.
///
/// Reads from `reader`, writes the (possibly rewritten) stream to
/// `writer`, and returns the changes seen, in match order.
#[allow(clippy::too_many_arguments)]
pub async fn process<R, W>(
    conf: Arc<Config>,
    proc_name: String,
    filename: String,
    mut reader: R,
    mut writer: W,
    locks: Arc<Locks>,
    cache: Arc<Cache>,
    action: Action,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<Change>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let Some(proc) = conf.processors.get(&proc_name) else {
        return Err(VbumpError::MissingReference {
            kind: "processor",
            name: proc_name,
        }
        .into());
    };
    let proc = proc.clone();

    let Some(scan) = conf.scans.get(&proc.scan) else {
        return Err(VbumpError::MissingReference {
            kind: "scanner",
            name: proc.scan.clone(),
        }
        .into());
    };
    let mut scan = scan.clone();
    scan.args = merge_args(&scan.args, &proc.scan_args);

    let Some(src) = conf.sources.get(&proc.source) else {
        return Err(VbumpError::MissingReference {
            kind: "source",
            name: proc.source.clone(),
        }
        .into());
    };
    let mut src = src.clone();
    src.args = merge_args(&src.args, &proc.source_args);

    // scanner config is match-independent, so its args expand up front
    let base_data = template_data(&filename, &proc, &scan, &src, None);
    for value in scan.args.values_mut() {
        *value = template::render(value, &base_data)?;
    }

    debug!(processor = %proc.name, scan = %scan.name, source = %src.name, file = %filename, "running processor");

    let scan_for_run = scan.clone();
    let mut resolver = VersionResolver {
        filename: filename.clone(),
        proc,
        scan,
        source: src,
        locks,
        cache,
        action,
        cancel,
        changes: Vec::new(),
    };
    eprintln!("DEBUG processor {proc_name} about to scanner::run");
    scanner::run(
        &scan_for_run,
        &filename,
        &mut reader,
        &mut writer,
        &mut resolver,
    )
    .await
    .map_err(|e| {
        e.context(format!(
            "scanner {} failed for {filename}",
            scan_for_run.name
        ))
    })?;
    eprintln!("DEBUG processor {proc_name} scanner::run returned, dropping writer now");
    Ok(resolver.changes)
}

/// The per-match callback state.
struct VersionResolver {
    filename: String,
    proc: ProcessorEntry,
    scan: ScanEntry,
    source: SourceEntry,
    locks: Arc<Locks>,
    cache: Arc<Cache>,
    action: Action,
    cancel: CancellationToken,
    changes: Vec<Change>,
}

#[async_trait]
impl Resolver for VersionResolver {
    async fn resolve(
        &mut self,
        current: &str,
        captures: &BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        let mut data =
            template_data(&self.filename, &self.proc, &self.scan, &self.source, Some(captures));

        // expand the source args against the match, then re-expose the
        // expanded args to the key template
        let mut src = self.source.clone();
        for value in src.args.values_mut() {
            *value = template::render(value, &data)?;
        }
        data["SourceArgs"] = serde_json::to_value(&src.args)?;
        data["Source"]["Args"] = data["SourceArgs"].clone();

        let key = template::render(&self.proc.key, &data)?;
        data["Processor"]["Key"] = Value::String(key.clone());

        let new_version = match self.action {
            // scan records what the file already says; no upstream query
            Action::Scan => current.to_string(),
            Action::Check | Action::Update => {
                let results = source::get(&src, &self.cache, &self.cancel)
                    .await
                    .map_err(|e| {
                        anyhow::Error::from(e)
                            .context(format!("failed to query source {}", src.name))
                    })?;
                select::select(&results, &self.proc, &data)?
            }
        };

        self.locks.set(&self.proc.name, &key, &new_version);

        if new_version != current {
            self.changes.push(Change {
                filename: self.filename.clone(),
                processor: self.proc.name.clone(),
                scan: self.proc.scan.clone(),
                source: self.proc.source.clone(),
                key,
                orig: current.to_string(),
                new: new_version.clone(),
            });
        }
        Ok(new_version)
    }
}

/// Merge arg maps, later maps winning.
fn merge_args(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Build the template context for one processor binding, optionally with
/// the captures of the current match.
fn template_data(
    filename: &str,
    proc: &ProcessorEntry,
    scan: &ScanEntry,
    source: &SourceEntry,
    scan_match: Option<&BTreeMap<String, String>>,
) -> Value {
    json!({
        "Filename": filename,
        "Processor": {
            "Name": proc.name,
            "Scan": proc.scan,
            "Source": proc.source,
            "Key": proc.key,
            "Template": proc.template,
        },
        "Scan": {
            "Name": scan.name,
            "Type": scan.scan_type,
            "Args": scan.args,
        },
        "Source": {
            "Name": source.name,
            "Type": source.source_type,
            "Args": source.args,
        },
        "ScanArgs": scan.args,
        "SourceArgs": source.args,
        "ScanMatch": scan_match.cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn manual_config(version: &str) -> Config {
        Config::load_reader(
            format!(
                r#"
files:
  "target.txt":
    processors: [m]
processors:
  m:
    scan: line
    source: pin
    key: "manual"
scans:
  line:
    type: regexp
    args:
      regexp: "^testVer=(?P<Version>[0-9.]+)"
sources:
  pin:
    type: manual
    args:
      Version: "{version}"
"#
            )
            .as_bytes(),
        )
        .unwrap()
    }

    async fn run_process(
        conf: Config,
        proc: &str,
        input: &str,
        action: Action,
    ) -> (String, Vec<Change>, Arc<Locks>) {
        let locks = Arc::new(Locks::new());
        let mut out = Vec::new();
        let changes = process(
            Arc::new(conf),
            proc.to_string(),
            "target.txt".to_string(),
            std::io::Cursor::new(input.as_bytes().to_vec()),
            &mut out,
            locks.clone(),
            Arc::new(Cache::new()),
            action,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        (String::from_utf8(out).unwrap(), changes, locks)
    }

    #[tokio::test]
    async fn manual_source_rewrites_and_locks() {
        let (out, changes, locks) = run_process(
            manual_config("4.3.2.1"),
            "m",
            "testVer=1.2.3.4\n",
            Action::Update,
        )
        .await;
        assert_eq!(out, "testVer=4.3.2.1\n");
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.orig, "1.2.3.4");
        assert_eq!(change.new, "4.3.2.1");
        assert_eq!(change.processor, "m");
        assert_eq!(change.scan, "line");
        assert_eq!(change.source, "pin");
        assert_eq!(change.key, "manual");
        assert_eq!(locks.get("m", "manual").unwrap().version, "4.3.2.1");
    }

    #[tokio::test]
    async fn matching_version_produces_no_change() {
        let (out, changes, locks) = run_process(
            manual_config("1.2.3.4"),
            "m",
            "testVer=1.2.3.4\n",
            Action::Update,
        )
        .await;
        assert_eq!(out, "testVer=1.2.3.4\n");
        assert!(changes.is_empty());
        // the lock is still recorded
        assert_eq!(locks.get("m", "manual").unwrap().version, "1.2.3.4");
    }

    #[tokio::test]
    async fn scan_action_snapshots_without_querying() {
        // the manual source would say 9.9.9; scan must keep 1.2.3.4
        let (out, changes, locks) = run_process(
            manual_config("9.9.9"),
            "m",
            "testVer=1.2.3.4\n",
            Action::Scan,
        )
        .await;
        assert_eq!(out, "testVer=1.2.3.4\n");
        assert!(changes.is_empty());
        assert_eq!(locks.get("m", "manual").unwrap().version, "1.2.3.4");
    }

    #[tokio::test]
    async fn missing_processor_is_a_config_error() {
        let conf = manual_config("1.0");
        let mut out = Vec::new();
        let err = process(
            Arc::new(conf),
            "nope".to_string(),
            "f".to_string(),
            std::io::Cursor::new(Vec::new()),
            &mut out,
            Arc::new(Locks::new()),
            Arc::new(Cache::new()),
            Action::Update,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("processor not defined: nope"));
    }

    #[tokio::test]
    async fn key_template_sees_scan_match() {
        let conf = Config::load_reader(
            r#"
processors:
  p:
    scan: line
    source: pin
    key: "{{.ScanMatch.repo}}-{{.ScanMatch.tag}}"
scans:
  line:
    type: regexp
    args:
      regexp: "(?P<repo>[a-z]+)/(?P<tag>v[0-9.]+)=(?P<Version>[0-9a-f]+)"
sources:
  pin:
    type: manual
    args:
      Version: "deadbeef"
"#
            .as_bytes(),
        )
        .unwrap();
        let locks = Arc::new(Locks::new());
        let mut out = Vec::new();
        let changes = process(
            Arc::new(conf),
            "p".to_string(),
            "f".to_string(),
            std::io::Cursor::new(b"proj/v1.2.3=0000000\n".to_vec()),
            &mut out,
            locks.clone(),
            Arc::new(Cache::new()),
            Action::Update,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(changes[0].key, "proj-v1.2.3");
        assert!(locks.get("p", "proj-v1.2.3").is_some());
    }

    #[tokio::test]
    async fn processor_arg_overrides_win() {
        let conf = Config::load_reader(
            r#"
processors:
  p:
    scan: line
    source: pin
    key: "k"
    sourceArgs:
      Version: "override"
scans:
  line:
    type: regexp
    args:
      regexp: "v=(?P<Version>\\w+)"
sources:
  pin:
    type: manual
    args:
      Version: "base"
"#
            .as_bytes(),
        )
        .unwrap();
        let mut out = Vec::new();
        let changes = process(
            Arc::new(conf),
            "p".to_string(),
            "f".to_string(),
            std::io::Cursor::new(b"v=old".to_vec()),
            &mut out,
            Arc::new(Locks::new()),
            Arc::new(Cache::new()),
            Action::Update,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(changes[0].new, "override");
        assert_eq!(String::from_utf8(out).unwrap(), "v=override");
    }

    #[tokio::test]
    async fn source_args_expand_against_the_match() {
        let conf = Config::load_reader(
            r#"
processors:
  p:
    scan: line
    source: echo
    key: "k"
scans:
  line:
    type: regexp
    args:
      regexp: "(?P<name>[a-z]+)=(?P<Version>\\w+)"
sources:
  echo:
    type: manual
    args:
      Version: "{{.ScanMatch.name}}-next"
"#
            .as_bytes(),
        )
        .unwrap();
        let mut out = Vec::new();
        let changes = process(
            Arc::new(conf),
            "p".to_string(),
            "f".to_string(),
            std::io::Cursor::new(b"tool=old".to_vec()),
            &mut out,
            Arc::new(Locks::new()),
            Arc::new(Cache::new()),
            Action::Update,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(changes[0].new, "tool-next");
    }
}
