//! The `gh-release` provider: the GitHub releases REST API.
//!
//! Args: `repo` (mandatory, `owner/name`), `type` (`artifact` or default),
//! `artifact` (mandatory with `type=artifact`), `allowDraft` and
//! `allowPrerelease` (boolean strings, default false).
//!
//! The release list is fetched once per repo and cached; each filtered
//! projection (name mode or artifact mode, with its allow-flags) is cached
//! separately. If `GH_TOKEN` or `GITHUB_TOKEN` is set it is sent as HTTP
//! basic auth with user `git`, which raises the unauthenticated rate limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{required_arg, with_cancel, Cache, Results};
use crate::config::SourceEntry;
use crate::core::VbumpError;

const API_ROOT: &str = "https://api.github.com";

/// One release as returned by the API. Unknown fields are ignored and
/// missing ones default, so schema drift upstream stays non-fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    pub url: String,
    pub html_url: String,
    pub id: i64,
    pub tag_name: String,
    pub target_commitish: String,
    pub name: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub assets: Vec<Asset>,
}

/// One release asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    pub url: String,
    pub id: i64,
    pub name: String,
    pub content_type: String,
    pub state: String,
    pub size: u64,
    pub download_count: u64,
    pub browser_download_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub async fn get(
    source: &SourceEntry,
    cache: &Cache,
    cancel: &CancellationToken,
) -> Result<Results, VbumpError> {
    let repo = required_arg(source, "repo")?.to_string();
    let allow_draft = parse_bool_arg(source, "allowDraft")?;
    let allow_prerelease = parse_bool_arg(source, "allowPrerelease")?;
    let artifact = if source.args.get("type").map(String::as_str) == Some("artifact") {
        Some(required_arg(source, "artifact")?.to_string())
    } else {
        None
    };

    let key = format!(
        "{repo}:{}:{allow_draft}:{allow_prerelease}",
        artifact.as_deref().unwrap_or("")
    );
    if let Some(hit) = cache
        .gh_results
        .lock()
        .expect("gh-release cache poisoned")
        .get(&key)
    {
        return Ok(hit.clone());
    }

    let releases = release_list(&repo, cache, cancel).await?;
    let results = project(&releases, allow_draft, allow_prerelease, artifact.as_deref())?;

    let mut guard = cache
        .gh_results
        .lock()
        .expect("gh-release cache poisoned");
    Ok(guard.entry(key).or_insert(results).clone())
}

/// Fetch the full release list for a repo, cached per repo.
async fn release_list(
    repo: &str,
    cache: &Cache,
    cancel: &CancellationToken,
) -> Result<Vec<Release>, VbumpError> {
    if let Some(hit) = cache
        .gh_releases
        .lock()
        .expect("gh-release cache poisoned")
        .get(repo)
    {
        return Ok(hit.clone());
    }

    let url = format!("{API_ROOT}/repos/{repo}/releases");
    let releases = with_cancel(cancel, "gh-release query", async {
        let mut req = cache
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = api_token() {
            req = req.basic_auth("git", Some(token));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| VbumpError::Upstream(format!("failed to call releases API: {e}")))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(VbumpError::Upstream(format!(
                "unexpected status from API, status: {}, body: {body}",
                status.as_u16()
            )));
        }
        resp.json::<Vec<Release>>().await.map_err(|e| {
            VbumpError::Upstream(format!("failed to decode release API response: {e}"))
        })
    })
    .await?;

    let mut guard = cache
        .gh_releases
        .lock()
        .expect("gh-release cache poisoned");
    Ok(guard.entry(repo.to_string()).or_insert(releases).clone())
}

/// Build the result set from a release list: filter by the allow-flags,
/// then either map tag names to themselves or to the matching asset's
/// download URL.
fn project(
    releases: &[Release],
    allow_draft: bool,
    allow_prerelease: bool,
    artifact: Option<&str>,
) -> Result<Results, VbumpError> {
    let mut results = Results::default();
    for release in releases {
        if release.draft && !allow_draft {
            continue;
        }
        if release.prerelease && !allow_prerelease {
            continue;
        }
        match artifact {
            None => {
                results
                    .ver_map
                    .insert(release.tag_name.clone(), release.tag_name.clone());
                results.ver_meta.insert(
                    release.tag_name.clone(),
                    serde_json::to_value(release).unwrap_or_default(),
                );
            }
            Some(artifact) => {
                if let Some(asset) = release.assets.iter().find(|a| a.name == artifact) {
                    results.ver_map.insert(
                        release.tag_name.clone(),
                        asset.browser_download_url.clone(),
                    );
                    results.ver_meta.insert(
                        release.tag_name.clone(),
                        serde_json::to_value(asset).unwrap_or_default(),
                    );
                }
            }
        }
    }
    if let Some(artifact) = artifact {
        if results.ver_map.is_empty() {
            return Err(VbumpError::Upstream(format!(
                "no releases found with artifact \"{artifact}\""
            )));
        }
    }
    Ok(results)
}

fn api_token() -> Option<String> {
    std::env::var("GH_TOKEN")
        .or_else(|_| std::env::var("GITHUB_TOKEN"))
        .ok()
        .filter(|t| !t.is_empty())
}

/// Parse a boolean arg the way the config promises: absent means false.
fn parse_bool_arg(source: &SourceEntry, name: &str) -> Result<bool, VbumpError> {
    match source.args.get(name).map(String::as_str) {
        None | Some("") => Ok(false),
        Some("true") | Some("True") | Some("TRUE") | Some("t") | Some("T") | Some("1") => Ok(true),
        Some("false") | Some("False") | Some("FALSE") | Some("f") | Some("F") | Some("0") => {
            Ok(false)
        }
        Some(other) => Err(VbumpError::Upstream(format!(
            "{name} must be a bool value: \"{other}\""
        ))),
    }
}
