//! Source providers: upstream queries for candidate versions.
//!
//! A provider is a function from an arg table to a multi-valued
//! [`Results`]. Five kinds exist:
//!
//! | type         | upstream                              |
//! |--------------|---------------------------------------|
//! | `manual`     | a literal from the config             |
//! | `custom`     | stdout of a shell command             |
//! | `git`        | refs advertised by a git remote       |
//! | `registry`   | OCI registry tags or manifest digests |
//! | `gh-release` | the GitHub releases REST API          |
//!
//! Results are cached for the lifetime of the process in a [`Cache`]
//! context the engine threads through; keys are stable over equal arg
//! tables, each provider's map is guarded by its own mutex, and the mutex
//! is never held across the network fetch (callers double-check on
//! insert). Cached values are handed out by value so downstream mutation
//! cannot leak back into the cache.

pub mod custom;
pub mod git;
pub mod github;
pub mod manual;
pub mod registry;

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SourceEntry};
use crate::core::VbumpError;

/// Candidate versions from one upstream query.
///
/// `ver_map` is the selectable set: the key is what filter and sort see,
/// the value is what gets emitted (for `git` commit mode, tag -> commit
/// hash). `ver_meta` carries opaque per-key metadata for output templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Results {
    #[serde(rename = "VerMap")]
    pub ver_map: BTreeMap<String, String>,
    #[serde(rename = "VerMeta")]
    pub ver_meta: BTreeMap<String, Value>,
}

/// Process-wide provider caches plus the shared HTTP client.
pub struct Cache {
    pub(crate) git: Mutex<HashMap<(String, String), Results>>,
    pub(crate) registry: Mutex<HashMap<(String, String), Results>>,
    pub(crate) gh_releases: Mutex<HashMap<String, Vec<github::Release>>>,
    pub(crate) gh_results: Mutex<HashMap<String, Results>>,
    pub(crate) http: reqwest::Client,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            git: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            gh_releases: Mutex::new(HashMap::new()),
            gh_results: Mutex::new(HashMap::new()),
            http: reqwest::Client::builder()
                .user_agent(concat!("vbump/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("default HTTP client"),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Query a source (cached). Args must already be template-expanded.
pub async fn get(
    source: &SourceEntry,
    cache: &Cache,
    cancel: &CancellationToken,
) -> Result<Results, VbumpError> {
    match source.source_type.as_str() {
        "manual" => manual::get(source),
        "custom" => custom::get(source, cancel).await,
        "git" => git::get(source, cache, cancel).await,
        "registry" => registry::get(source, cache, cancel).await,
        "gh-release" => github::get(source, cache, cancel).await,
        other => Err(VbumpError::UnknownType {
            kind: "source",
            name: other.to_string(),
        }),
    }
}

/// Validate every configured source at startup: unknown types and
/// providers unusable on this platform are config errors, reported before
/// any file is touched.
pub fn validate(conf: &Config) -> Result<(), VbumpError> {
    for source in conf.sources.values() {
        match source.source_type.as_str() {
            "manual" | "git" | "registry" | "gh-release" => {}
            "custom" => {
                if cfg!(not(unix)) {
                    return Err(VbumpError::ConfigParse(format!(
                        "custom source {} requires a POSIX shell, not available on this platform",
                        source.name
                    )));
                }
            }
            other => {
                return Err(VbumpError::UnknownType {
                    kind: "source",
                    name: other.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Await `fut`, failing early if `cancel` fires first.
pub(crate) async fn with_cancel<T, F>(
    cancel: &CancellationToken,
    what: &str,
    fut: F,
) -> Result<T, VbumpError>
where
    F: Future<Output = Result<T, VbumpError>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(VbumpError::Upstream(format!("{what} cancelled"))),
        r = fut => r,
    }
}

/// Fetch a required arg or fail naming it.
pub(crate) fn required_arg<'a>(
    source: &'a SourceEntry,
    name: &str,
) -> Result<&'a str, VbumpError> {
    source
        .args
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| {
            VbumpError::Upstream(format!(
                "{name} argument is required for source {}",
                source.name
            ))
        })
}
