//! Configuration loading for the version-pinning engine.
//!
//! The config file (default `.version-bump.yml`) is a YAML document with
//! four tables, each keyed by a unique name:
//!
//! ```yaml
//! version: 1
//! files:
//!   "**/*.yml":
//!     processors: [gha-uses]
//! processors:
//!   gha-uses:
//!     scan: gha-uses-line
//!     source: github-tags
//!     sourceArgs:
//!       url: "https://github.com/{{.ScanMatch.Repo}}.git"
//!     key: "{{.ScanMatch.Repo}}"
//!     filter:
//!       expr: '^v\d+\.\d+\.\d+$'
//!     sort:
//!       method: semver
//! scans:
//!   gha-uses-line:
//!     type: regexp
//!     args:
//!       regexp: 'uses: (?P<Repo>[^@]+)@(?P<Version>v[\d\.]+)'
//! sources:
//!   github-tags:
//!     type: git
//!     args:
//!       type: tag
//! ```
//!
//! A legacy schema, where files referenced scans directly and the selection
//! rules (key/filter/sort/template) lived on the source, is upgraded in
//! place during load: every scan referenced by a file entry is materialized
//! into a processor of the same name, and the rest of the system only ever
//! sees processors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::core::VbumpError;

/// Highest config schema version this build understands.
const MAX_CONFIG_VERSION: u32 = 1;

/// A file entry: glob pattern (the map key) plus the processors to run on
/// every matching file, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEntry {
    /// Processor names to apply, in pipeline order.
    pub processors: Vec<String>,
    /// Legacy schema: scan names applied directly. Upgraded into
    /// `processors` during load.
    pub scans: Vec<String>,
}

/// A processor binds a scanner to a source and carries the selection rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorEntry {
    /// Entry name, back-filled from the map key.
    #[serde(skip)]
    pub name: String,
    /// Name of the scan entry to run.
    pub scan: String,
    /// Arg overrides merged over the scan entry's args.
    #[serde(rename = "scanArgs")]
    pub scan_args: BTreeMap<String, String>,
    /// Name of the source entry to query.
    pub source: String,
    /// Arg overrides merged over the source entry's args.
    #[serde(rename = "sourceArgs")]
    pub source_args: BTreeMap<String, String>,
    /// Lock-store key template, expanded per match.
    pub key: String,
    /// Filter applied to the source results.
    pub filter: Filter,
    /// Sort rules used to pick one result.
    pub sort: Sort,
    /// Output template for the selected version.
    pub template: String,
}

/// A scanner definition: the method plus its args (for `regexp` scanners
/// the pattern lives under the `regexp` arg).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanEntry {
    /// Entry name, back-filled from the map key.
    #[serde(skip)]
    pub name: String,
    /// Scanner method; only `regexp` is defined.
    #[serde(rename = "type")]
    pub scan_type: String,
    /// Scanner args.
    pub args: BTreeMap<String, String>,
    /// Legacy schema: source bound directly to the scan.
    pub source: String,
}

/// A source definition: the provider type plus its args.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceEntry {
    /// Entry name, back-filled from the map key.
    #[serde(skip)]
    pub name: String,
    /// Provider type: `manual`, `custom`, `git`, `registry`, `gh-release`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Provider args, template-expanded per match before the query.
    pub args: BTreeMap<String, String>,
    /// Legacy schema: selection rules that now live on the processor.
    pub key: String,
    /// Legacy schema filter.
    pub filter: Filter,
    /// Legacy schema sort.
    pub sort: Sort,
    /// Legacy schema output template.
    pub template: String,
}

/// Regex filter over the result keys. The expression is template-expanded
/// against the match context before compiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Regular expression; empty means no filtering.
    pub expr: String,
    /// Reserved by the legacy schema, currently unused.
    pub template: String,
}

/// How to pick one entry from a multi-valued result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sort {
    /// `semver`, `numeric`, or empty for lexical.
    pub method: String,
    /// Ascending when true; default is descending.
    pub asc: bool,
    /// Index into the sorted list.
    pub offset: usize,
    /// Optional transform applied to each key before sorting; the key is
    /// the template's root value (`{{.}}`).
    pub template: String,
}

/// The full configuration snapshot, immutable for the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version; at most 1.
    pub version: u32,
    /// Glob pattern -> file entry.
    pub files: BTreeMap<String, FileEntry>,
    /// Processor name -> processor entry.
    pub processors: BTreeMap<String, ProcessorEntry>,
    /// Scan name -> scan entry.
    pub scans: BTreeMap<String, ScanEntry>,
    /// Source name -> source entry.
    pub sources: BTreeMap<String, SourceEntry>,
}

impl Config {
    /// Parse a config from a reader, validate the schema version, back-fill
    /// entry names, and upgrade the legacy schema.
    pub fn load_reader(mut r: impl Read) -> Result<Self, VbumpError> {
        let mut raw = String::new();
        r.read_to_string(&mut raw)
            .map_err(|e| VbumpError::ConfigParse(e.to_string()))?;
        // an empty document is an empty config, not a parse error
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut conf: Config =
            serde_yaml::from_str(&raw).map_err(|e| VbumpError::ConfigParse(e.to_string()))?;
        if conf.version > MAX_CONFIG_VERSION {
            return Err(VbumpError::UnsupportedConfigVersion(conf.version));
        }
        for (name, entry) in &mut conf.processors {
            entry.name.clone_from(name);
        }
        for (name, entry) in &mut conf.scans {
            entry.name.clone_from(name);
        }
        for (name, entry) in &mut conf.sources {
            entry.name.clone_from(name);
        }
        conf.upgrade_legacy();
        Ok(conf)
    }

    /// Load a config file from disk.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, VbumpError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| VbumpError::io(path, e))?;
        Self::load_reader(file)
    }

    /// Materialize the legacy scan-to-source binding into processors.
    ///
    /// For every scan referenced directly from a file entry, synthesize a
    /// processor of the same name carrying the scan's source and that
    /// source's key/filter/sort/template, then move the reference over to
    /// the file's processor list. Files with explicit processors are left
    /// untouched.
    fn upgrade_legacy(&mut self) {
        for entry in self.files.values_mut() {
            for scan_name in std::mem::take(&mut entry.scans) {
                if !entry.processors.contains(&scan_name) {
                    entry.processors.push(scan_name.clone());
                }
                if self.processors.contains_key(&scan_name) {
                    continue;
                }
                let Some(scan) = self.scans.get(&scan_name) else {
                    // Leave the dangling reference for the engine to report
                    // against the file it applies to.
                    continue;
                };
                let source = self.sources.get(&scan.source);
                self.processors.insert(
                    scan_name.clone(),
                    ProcessorEntry {
                        name: scan_name.clone(),
                        scan: scan_name.clone(),
                        scan_args: BTreeMap::new(),
                        source: scan.source.clone(),
                        source_args: BTreeMap::new(),
                        key: source.map(|s| s.key.clone()).unwrap_or_default(),
                        filter: source.map(|s| s.filter.clone()).unwrap_or_default(),
                        sort: source.map(|s| s.sort.clone()).unwrap_or_default(),
                        template: source.map(|s| s.template.clone()).unwrap_or_default(),
                    },
                );
            }
        }
    }
}
