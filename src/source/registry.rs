//! The `registry` provider: OCI Distribution v2 queries.
//!
//! Two modes:
//!
//! - `type=tag`: `repo` is mandatory; the tag list becomes
//!   `Results{tag -> tag}`.
//! - default (digest): `image` is mandatory; a manifest HEAD resolves the
//!   image reference to its digest, returned as the singleton
//!   `Results{digest -> digest}`.
//!
//! References follow the docker conventions: a first segment containing a
//! dot, a colon, or `localhost` names the registry, `docker.io` images
//! without a namespace get `library/` prefixed, and the API host for
//! `docker.io` is `registry-1.docker.io`. Anonymous requests that bounce
//! with a Bearer challenge are retried with a token from the challenge
//! realm, using credentials discovered from `~/.docker/config.json` when
//! present. Results are cached per repo / per image.

use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{required_arg, with_cancel, Cache, Results};
use crate::config::SourceEntry;
use crate::core::VbumpError;

/// Manifest media types accepted on HEAD requests.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

pub async fn get(
    source: &SourceEntry,
    cache: &Cache,
    cancel: &CancellationToken,
) -> Result<Results, VbumpError> {
    let tag_mode = source.args.get("type").map(String::as_str) == Some("tag");
    if tag_mode {
        let repo = required_arg(source, "repo")?.to_string();
        cached(cache, ("tag", &repo), cancel, tag_list(&cache.http, &repo)).await
    } else {
        let image = required_arg(source, "image")?.to_string();
        cached(
            cache,
            ("digest", &image),
            cancel,
            manifest_digest(&cache.http, &image),
        )
        .await
    }
}

/// Run `fetch` through the registry cache with the usual double-checked
/// insert.
async fn cached(
    cache: &Cache,
    key: (&str, &str),
    cancel: &CancellationToken,
    fetch: impl std::future::Future<Output = Result<Results, VbumpError>>,
) -> Result<Results, VbumpError> {
    let key = (key.0.to_string(), key.1.to_string());
    if let Some(hit) = cache
        .registry
        .lock()
        .expect("registry cache poisoned")
        .get(&key)
    {
        return Ok(hit.clone());
    }
    let results = with_cancel(cancel, "registry query", fetch).await?;
    let mut guard = cache.registry.lock().expect("registry cache poisoned");
    Ok(guard.entry(key).or_insert(results).clone())
}

async fn tag_list(client: &reqwest::Client, repo: &str) -> Result<Results, VbumpError> {
    let reference = Reference::parse(repo)?;
    let url = format!(
        "https://{}/v2/{}/tags/list",
        reference.host, reference.repository
    );
    let resp = send_authenticated(client, reqwest::Method::GET, &url, None, &reference).await?;
    if !resp.status().is_success() {
        return Err(VbumpError::Upstream(format!(
            "failed to list tags for {repo}: status {}",
            resp.status().as_u16()
        )));
    }

    #[derive(Deserialize)]
    struct TagList {
        #[serde(default)]
        tags: Vec<String>,
    }
    let list: TagList = resp
        .json()
        .await
        .map_err(|e| VbumpError::Upstream(format!("failed to decode tag list for {repo}: {e}")))?;
    if list.tags.is_empty() {
        return Err(VbumpError::Upstream(format!("no tags found for {repo}")));
    }
    let mut results = Results::default();
    for tag in list.tags {
        results.ver_map.insert(tag.clone(), tag);
    }
    Ok(results)
}

async fn manifest_digest(client: &reqwest::Client, image: &str) -> Result<Results, VbumpError> {
    let reference = Reference::parse(image)?;
    let url = format!(
        "https://{}/v2/{}/manifests/{}",
        reference.host, reference.repository, reference.reference
    );
    let resp = send_authenticated(
        client,
        reqwest::Method::HEAD,
        &url,
        Some(MANIFEST_ACCEPT),
        &reference,
    )
    .await?;
    if !resp.status().is_success() {
        return Err(VbumpError::Upstream(format!(
            "failed to query image {image}: status {}",
            resp.status().as_u16()
        )));
    }
    // the digest header is mandatory for this provider
    let digest = resp
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            VbumpError::Upstream(format!("registry returned no digest for {image}"))
        })?;
    let mut results = Results::default();
    results.ver_map.insert(digest.clone(), digest);
    Ok(results)
}

/// Send a v2 request, negotiating Bearer auth on a 401 challenge.
async fn send_authenticated(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    accept: Option<&str>,
    reference: &Reference,
) -> Result<reqwest::Response, VbumpError> {
    let build = |token: Option<&str>| {
        let mut req = client.request(method.clone(), url);
        if let Some(accept) = accept {
            req = req.header(reqwest::header::ACCEPT, accept);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req
    };
    let send_err =
        |e: reqwest::Error| VbumpError::Upstream(format!("registry request failed: {e}"));

    let resp = build(None).send().await.map_err(send_err)?;
    if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Ok(resp);
    }
    let challenge = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_challenge)
        .ok_or_else(|| {
            VbumpError::Upstream(format!(
                "registry {} rejected the request without a usable auth challenge",
                reference.host
            ))
        })?;
    let scope = format!("repository:{}:pull", reference.repository);
    let token = fetch_token(client, &challenge, &scope, &reference.host).await?;
    build(Some(&token)).send().await.map_err(send_err)
}

/// A parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, PartialEq)]
struct Challenge {
    realm: String,
    service: Option<String>,
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for field in rest.split(',') {
        let (key, value) = field.trim().split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }
    Some(Challenge {
        realm: realm?,
        service,
    })
}

async fn fetch_token(
    client: &reqwest::Client,
    challenge: &Challenge,
    scope: &str,
    host: &str,
) -> Result<String, VbumpError> {
    let mut req = client.get(&challenge.realm).query(&[("scope", scope)]);
    if let Some(service) = &challenge.service {
        req = req.query(&[("service", service)]);
    }
    if let Some((user, pass)) = docker_credentials(host) {
        req = req.basic_auth(user, Some(pass));
    }
    let resp = req
        .send()
        .await
        .map_err(|e| VbumpError::Upstream(format!("token request failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(VbumpError::Upstream(format!(
            "token request to {} failed: status {}",
            challenge.realm,
            resp.status().as_u16()
        )));
    }

    #[derive(Deserialize)]
    struct TokenResponse {
        #[serde(default)]
        token: String,
        #[serde(default)]
        access_token: String,
    }
    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| VbumpError::Upstream(format!("failed to decode token response: {e}")))?;
    let token = if body.token.is_empty() {
        body.access_token
    } else {
        body.token
    };
    if token.is_empty() {
        return Err(VbumpError::Upstream(format!(
            "token endpoint {} returned no token",
            challenge.realm
        )));
    }
    Ok(token)
}

/// An image or repository reference split into API coordinates.
#[derive(Debug, PartialEq)]
struct Reference {
    /// API hostname (already normalized for docker.io)
    host: String,
    /// Repository path within the registry
    repository: String,
    /// Tag or digest; `latest` when unspecified
    reference: String,
}

impl Reference {
    fn parse(input: &str) -> Result<Self, VbumpError> {
        if input.is_empty() {
            return Err(VbumpError::Upstream("empty image reference".to_string()));
        }
        // digest pins bind tighter than tags
        let (name, reference) = match input.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (input, None),
        };
        // a tag colon lives after the last path separator
        let (name, reference) = match reference {
            Some(r) => (name.to_string(), r),
            None => {
                let last_segment_start = name.rfind('/').map_or(0, |i| i + 1);
                match name[last_segment_start..].split_once(':') {
                    Some((seg, tag)) => (
                        format!("{}{}", &name[..last_segment_start], seg),
                        tag.to_string(),
                    ),
                    None => (name.to_string(), "latest".to_string()),
                }
            }
        };
        // the first segment is a registry only if it can be one
        let (host, mut repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => ("docker.io".to_string(), name),
        };
        if host == "docker.io" && !repository.contains('/') {
            repository = format!("library/{repository}");
        }
        let host = match host.as_str() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io".to_string(),
            other => other.to_string(),
        };
        Ok(Self {
            host,
            repository,
            reference,
        })
    }
}

/// Look up basic credentials for a registry host from the local docker
/// config, if one exists.
fn docker_credentials(host: &str) -> Option<(String, String)> {
    let config_dir = std::env::var_os("DOCKER_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".docker")))?;
    read_docker_credentials(&config_dir.join("config.json"), host)
}

fn read_docker_credentials(path: &std::path::Path, host: &str) -> Option<(String, String)> {
    #[derive(Deserialize)]
    struct DockerConfig {
        #[serde(default)]
        auths: std::collections::BTreeMap<String, DockerAuth>,
    }
    #[derive(Deserialize)]
    struct DockerAuth {
        #[serde(default)]
        auth: String,
    }

    let raw = std::fs::read(path).ok()?;
    let config: DockerConfig = serde_json::from_slice(&raw).ok()?;
    let mut candidates = vec![host.to_string(), format!("https://{host}")];
    if host == "registry-1.docker.io" {
        candidates.extend([
            "https://index.docker.io/v1/".to_string(),
            "index.docker.io".to_string(),
            "docker.io".to_string(),
        ]);
    }
    let auth = candidates
        .iter()
        .find_map(|key| config.auths.get(key))
        .filter(|a| !a.auth.is_empty())?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&auth.auth)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_parse_docker_hub_shorthand() {
        let r = Reference::parse("alpine").unwrap();
        assert_eq!(r.host, "registry-1.docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.reference, "latest");

        let r = Reference::parse("alpine:3.19").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.reference, "3.19");

        let r = Reference::parse("regclient/regctl").unwrap();
        assert_eq!(r.host, "registry-1.docker.io");
        assert_eq!(r.repository, "regclient/regctl");
    }

    #[test]
    fn references_parse_explicit_registries() {
        let r = Reference::parse("ghcr.io/org/image:v1.2.3").unwrap();
        assert_eq!(r.host, "ghcr.io");
        assert_eq!(r.repository, "org/image");
        assert_eq!(r.reference, "v1.2.3");

        let r = Reference::parse("localhost:5000/test").unwrap();
        assert_eq!(r.host, "localhost:5000");
        assert_eq!(r.repository, "test");
    }

    #[test]
    fn references_parse_digests() {
        let r = Reference::parse("alpine@sha256:abc123").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.reference, "sha256:abc123");
    }

    #[test]
    fn port_colon_is_not_a_tag() {
        let r = Reference::parse("localhost:5000/test/image").unwrap();
        assert_eq!(r.host, "localhost:5000");
        assert_eq!(r.repository, "test/image");
        assert_eq!(r.reference, "latest");
    }

    #[test]
    fn empty_reference_is_rejected() {
        assert!(Reference::parse("").is_err());
    }

    #[test]
    fn challenge_header_parses() {
        let c = parse_challenge(
            "Bearer realm=\"https://auth.docker.io/token\",service=\"registry.docker.io\"",
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.docker.io/token");
        assert_eq!(c.service.as_deref(), Some("registry.docker.io"));

        assert!(parse_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn docker_config_credentials_decode() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        // "user:secret"
        std::fs::write(
            &path,
            r#"{"auths":{"ghcr.io":{"auth":"dXNlcjpzZWNyZXQ="}}}"#,
        )
        .unwrap();
        let (user, pass) = read_docker_credentials(&path, "ghcr.io").unwrap();
        assert_eq!(user, "user");
        assert_eq!(pass, "secret");
        assert!(read_docker_credentials(&path, "other.io").is_none());
    }

    #[test]
    fn docker_hub_legacy_auth_key_matches() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths":{"https://index.docker.io/v1/":{"auth":"dXNlcjpzZWNyZXQ="}}}"#,
        )
        .unwrap();
        assert!(read_docker_credentials(&path, "registry-1.docker.io").is_some());
    }
}
