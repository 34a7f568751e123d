//! End-to-end tests for the engine: file rewrites, change reporting, and
//! lock persistence over a real temp tree.

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vbump::config::Config;
use vbump::engine::{Action, Engine, Options};
use vbump::lockfile::Locks;

/// Scenario config: a manual source pinning `testVer=` lines to 4.3.2.1.
fn manual_config(dir: &TempDir) -> Result<Config> {
    let prefix = dir.path().to_string_lossy();
    let yaml = format!(
        r#"
version: 1
files:
  "{prefix}/**/*.txt":
    processors: [m]
processors:
  m:
    scan: test-ver
    source: pin
    key: "manual"
scans:
  test-ver:
    type: regexp
    args:
      regexp: "^testVer=(?P<Version>[0-9.]+)"
sources:
  pin:
    type: manual
    args:
      Version: "4.3.2.1"
"#
    );
    Ok(Config::load_reader(yaml.as_bytes())?)
}

fn engine_with(conf: Config, locks: Arc<Locks>) -> Engine {
    Engine::new(Arc::new(conf), locks, CancellationToken::new())
}

fn opts_for(dir: &TempDir) -> Options {
    Options {
        paths: vec![dir.path().to_string_lossy().into_owned()],
        ..Options::default()
    }
}

#[tokio::test]
async fn manual_literal_updates_file_changes_and_lock() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("pins.txt");
    fs::write(&file, "testVer=1.2.3.4\nother line\n")?;

    let locks = Arc::new(Locks::new());
    let engine = engine_with(manual_config(&dir)?, locks.clone());
    let changes = engine.run(Action::Update, &opts_for(&dir)).await?;

    // the file is rewritten in place, only at the version span
    assert_eq!(fs::read_to_string(&file)?, "testVer=4.3.2.1\nother line\n");

    // one change with the original and new versions
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].orig, "1.2.3.4");
    assert_eq!(changes[0].new, "4.3.2.1");
    assert_eq!(changes[0].processor, "m");
    assert_eq!(changes[0].key, "manual");

    // the lock store records (m, manual) -> 4.3.2.1
    assert_eq!(locks.get("m", "manual").unwrap().version, "4.3.2.1");

    // and it persists deterministically
    let lock_path = dir.path().join("test.lock");
    locks.save_file(&lock_path, false)?;
    assert_eq!(
        fs::read_to_string(&lock_path)?,
        "{\"name\":\"m\",\"key\":\"manual\",\"version\":\"4.3.2.1\"}\n"
    );
    Ok(())
}

#[tokio::test]
async fn update_twice_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("pins.txt");
    fs::write(&file, "testVer=1.2.3.4\n")?;

    let engine = engine_with(manual_config(&dir)?, Arc::new(Locks::new()));
    let first = engine.run(Action::Update, &opts_for(&dir)).await?;
    assert_eq!(first.len(), 1);

    let engine = engine_with(manual_config(&dir)?, Arc::new(Locks::new()));
    let second = engine.run(Action::Update, &opts_for(&dir)).await?;
    assert!(second.is_empty());
    assert_eq!(fs::read_to_string(&file)?, "testVer=4.3.2.1\n");
    Ok(())
}

#[tokio::test]
async fn check_reports_drift_without_touching_files() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("pins.txt");
    fs::write(&file, "testVer=1.2.3.4\n")?;

    let engine = engine_with(manual_config(&dir)?, Arc::new(Locks::new()));
    let changes = engine.run(Action::Check, &opts_for(&dir)).await?;
    assert_eq!(changes.len(), 1);
    assert_eq!(fs::read_to_string(&file)?, "testVer=1.2.3.4\n");
    Ok(())
}

#[tokio::test]
async fn scan_snapshots_current_versions_into_locks() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("pins.txt"), "testVer=1.2.3.4\n")?;

    let locks = Arc::new(Locks::new());
    let engine = engine_with(manual_config(&dir)?, locks.clone());
    let changes = engine.run(Action::Scan, &opts_for(&dir)).await?;
    assert!(changes.is_empty());
    assert_eq!(locks.get("m", "manual").unwrap().version, "1.2.3.4");
    Ok(())
}

#[tokio::test]
async fn lock_prune_drops_untouched_entries() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("pins.txt"), "testVer=1.2.3.4\n")?;

    // pre-existing lock with an entry this run will touch (m/manual) and
    // one it will not (stale/old)
    let lock_path = dir.path().join("pins.lock");
    let pre = Locks::new();
    pre.set("m", "manual", "0.0.1");
    pre.set("stale", "old", "9.9.9");
    pre.save_file(&lock_path, false)?;

    let locks = Arc::new(Locks::load_file(&lock_path)?);
    let engine = engine_with(manual_config(&dir)?, locks.clone());
    engine.run(Action::Update, &opts_for(&dir)).await?;

    // save with prune: only the touched entry survives
    let pruned_path = dir.path().join("pruned.lock");
    locks.save_file(&pruned_path, true)?;
    let pruned = fs::read_to_string(&pruned_path)?;
    assert!(pruned.contains("\"name\":\"m\""));
    assert!(!pruned.contains("stale"));

    // save without prune keeps everything
    let full_path = dir.path().join("full.lock");
    locks.save_file(&full_path, false)?;
    let full = fs::read_to_string(&full_path)?;
    assert!(full.contains("\"name\":\"m\""));
    assert!(full.contains("stale"));
    Ok(())
}

#[tokio::test]
async fn legacy_config_runs_through_the_same_pipeline() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("pins.txt");
    fs::write(&file, "testVer=1.2.3.4\n")?;
    let prefix = dir.path().to_string_lossy();

    // old schema: files reference scans, the source carries the key
    let yaml = format!(
        r#"
files:
  "{prefix}/**/*.txt":
    scans: [test-ver]
scans:
  test-ver:
    type: regexp
    source: pin
    args:
      regexp: "^testVer=(?P<Version>[0-9.]+)"
sources:
  pin:
    type: manual
    key: "manual"
    args:
      Version: "4.3.2.1"
"#
    );
    let conf = Config::load_reader(yaml.as_bytes())?;
    let locks = Arc::new(Locks::new());
    let engine = engine_with(conf, locks.clone());
    let changes = engine.run(Action::Update, &opts_for(&dir)).await?;

    assert_eq!(fs::read_to_string(&file)?, "testVer=4.3.2.1\n");
    assert_eq!(changes.len(), 1);
    // the synthesized processor carries the scan's name
    assert_eq!(changes[0].processor, "test-ver");
    assert_eq!(locks.get("test-ver", "manual").unwrap().version, "4.3.2.1");
    Ok(())
}

#[tokio::test]
async fn github_actions_uses_line_rewrites_only_the_comment() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("workflow.txt");
    fs::write(
        &file,
        "  - uses: actions/checkout@8e5e7e5ab8b370d6c329ec480221332ada57f0ab # v3.5.2\n",
    )?;
    let prefix = dir.path().to_string_lossy();

    // the manual source stands in for the tag lookup; the scan pattern is
    // the real workflow-pinning shape with commit and comment captures
    let yaml = format!(
        r#"
files:
  "{prefix}/workflow.txt":
    processors: [gha]
processors:
  gha:
    scan: uses-line
    source: pin
    key: "{{{{.ScanMatch.Repo}}}}"
scans:
  uses-line:
    type: regexp
    args:
      regexp: '^\s+-?\s+uses: (?P<Repo>[^@/]+/[^@/]+)[^@]*@(?P<Commit>[0-9a-f]+)\s+#\s+(?P<Version>v\d+\.\d+\.\d+)\s*$'
sources:
  pin:
    type: manual
    args:
      Version: "v3.5.3"
"#
    );
    let conf = Config::load_reader(yaml.as_bytes())?;
    let engine = engine_with(conf, Arc::new(Locks::new()));
    let changes = engine.run(Action::Update, &opts_for(&dir)).await?;

    // only the comment's version moved; the commit hash is untouched
    assert_eq!(
        fs::read_to_string(&file)?,
        "  - uses: actions/checkout@8e5e7e5ab8b370d6c329ec480221332ada57f0ab # v3.5.3\n"
    );
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "actions/checkout");
    Ok(())
}

#[tokio::test]
async fn custom_source_feeds_the_pipeline() -> Result<()> {
    if cfg!(not(unix)) {
        return Ok(());
    }
    let dir = TempDir::new()?;
    let file = dir.path().join("pins.txt");
    fs::write(&file, "testVer=0.0.0\n")?;
    let prefix = dir.path().to_string_lossy();

    let yaml = format!(
        r#"
files:
  "{prefix}/pins.txt":
    processors: [sh]
processors:
  sh:
    scan: test-ver
    source: shell
    key: "cmd"
scans:
  test-ver:
    type: regexp
    args:
      regexp: "^testVer=(?P<Version>[0-9.]+)"
sources:
  shell:
    type: custom
    args:
      cmd: "echo 7.8.9"
"#
    );
    let conf = Config::load_reader(yaml.as_bytes())?;
    let engine = engine_with(conf, Arc::new(Locks::new()));
    engine.run(Action::Update, &opts_for(&dir)).await?;
    assert_eq!(fs::read_to_string(&file)?, "testVer=7.8.9\n");
    Ok(())
}
