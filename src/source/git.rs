//! The `git` provider: refs advertised by a remote.
//!
//! Args: `url` (mandatory) and `type` (`tag`, or commit mode by default).
//! The query is a bare `ls-remote` against the remote, using the system
//! git binary the same way cargo does, with peeled tag entries included.
//!
//! - `tag` mode: every advertised ref's short name, mapped to itself.
//! - commit mode: short name mapped to the commit hash. Annotated and
//!   signed tags advertise both the tag object's hash and, with a `^{}`
//!   suffix, the peeled commit hash; the peeled value wins and the suffix
//!   entry is dropped.
//!
//! Results are cached per `(url, type)`.

use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{required_arg, with_cancel, Cache, Results};
use crate::config::SourceEntry;
use crate::core::VbumpError;

/// Builder for git invocations: argument list, output capture, and a
/// bounded runtime so a wedged remote cannot hang the pipeline.
struct GitCommand {
    args: Vec<String>,
    timeout: Duration,
}

impl GitCommand {
    fn new() -> Self {
        Self {
            args: Vec::new(),
            // default timeout of 5 minutes, plenty for an advertisement
            timeout: Duration::from_secs(300),
        }
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command to completion, capturing output.
    async fn execute(self) -> Result<std::process::Output, VbumpError> {
        let what = format!("git {}", self.args.join(" "));
        let mut cmd = Command::new("git");
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(VbumpError::Upstream(format!("failed to run {what}: {e}"))),
            Err(_) => Err(VbumpError::Upstream(format!(
                "{what} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

pub async fn get(
    source: &SourceEntry,
    cache: &Cache,
    cancel: &CancellationToken,
) -> Result<Results, VbumpError> {
    let url = required_arg(source, "url")?.to_string();
    let tag_mode = source.args.get("type").map(String::as_str) == Some("tag");
    let key = (url.clone(), if tag_mode { "tag" } else { "commit" }.to_string());

    if let Some(hit) = cache.git.lock().expect("git cache poisoned").get(&key) {
        return Ok(hit.clone());
    }

    let advertisement = ls_remote(&url, cancel).await?;
    let refs = parse_advertisement(&advertisement);
    let results = results_from_refs(&refs, tag_mode);
    if results.ver_map.is_empty() {
        return Err(VbumpError::Upstream(format!(
            "no refs advertised from {url}"
        )));
    }

    let mut guard = cache.git.lock().expect("git cache poisoned");
    Ok(guard.entry(key).or_insert(results).clone())
}

/// Run `git ls-remote` and return its stdout.
async fn ls_remote(url: &str, cancel: &CancellationToken) -> Result<String, VbumpError> {
    let output = with_cancel(
        cancel,
        "git ls-remote",
        GitCommand::new().args(["ls-remote", "--", url]).execute(),
    )
    .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VbumpError::Upstream(format!(
            "git ls-remote {url} failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `hash<TAB>refname` advertisement lines.
fn parse_advertisement(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            if hash.is_empty() || name.is_empty() {
                return None;
            }
            Some((hash.to_string(), name.to_string()))
        })
        .collect()
}

/// Ref name without the standard prefixes; `HEAD` and other refs pass
/// through unchanged.
fn short_name(name: &str) -> &str {
    name.strip_prefix("refs/tags/")
        .or_else(|| name.strip_prefix("refs/heads/"))
        .unwrap_or(name)
}

/// Collapse the advertisement into a result set. Duplicate short names
/// collapse to one entry, preferring peeled (`^{}`) values.
fn results_from_refs(refs: &[(String, String)], tag_mode: bool) -> Results {
    let mut results = Results::default();
    let mut peeled: Vec<(String, String)> = Vec::new();
    for (hash, name) in refs {
        let short = short_name(name);
        if let Some(base) = short.strip_suffix("^{}") {
            peeled.push((base.to_string(), hash.clone()));
            continue;
        }
        let value = if tag_mode {
            short.to_string()
        } else {
            hash.clone()
        };
        results.ver_map.insert(short.to_string(), value);
    }
    if !tag_mode {
        for (short, hash) in peeled {
            results.ver_map.insert(short, hash);
        }
    }
    results
}
