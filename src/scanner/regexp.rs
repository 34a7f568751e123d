//! The `regexp` scanner.
//!
//! Config contract: the scan's args carry the pattern under the `regexp`
//! key, and the pattern must contain a named capture group called exactly
//! `Version`. Multi-line mode is implicit. For every non-overlapping match
//! the resolver is invoked with the current version and all named captures;
//! the returned version is spliced into the output over the `Version` span
//! and nothing else is altered.

use anyhow::Context;
use regex::bytes::Regex;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Resolver;
use crate::config::ScanEntry;
use crate::core::VbumpError;

/// Arg key holding the pattern.
const ARG_REGEXP: &str = "regexp";
/// The mandatory capture group name.
const CAPTURE_VERSION: &str = "Version";

/// Compile and validate the scan's pattern.
fn compile(scan: &ScanEntry) -> Result<Regex, VbumpError> {
    let Some(pattern) = scan.args.get(ARG_REGEXP) else {
        return Err(VbumpError::Pattern {
            pattern: String::new(),
            reason: format!("scan regexp arg is missing for {}", scan.name),
        });
    };
    let re = Regex::new(&format!("(?m){pattern}")).map_err(|e| VbumpError::Pattern {
        pattern: pattern.clone(),
        reason: format!("scan regexp does not compile for {}: {e}", scan.name),
    })?;
    if !re
        .capture_names()
        .any(|name| name == Some(CAPTURE_VERSION))
    {
        return Err(VbumpError::Pattern {
            pattern: pattern.clone(),
            reason: format!(
                "scan regexp is missing Version submatch (i.e. \"(?P<Version>\\d+)\") for {}",
                scan.name
            ),
        });
    }
    Ok(re)
}

/// Stream `reader` through the pattern into `writer`.
pub async fn run<R, W>(
    scan: &ScanEntry,
    filename: &str,
    reader: &mut R,
    writer: &mut W,
    resolver: &mut (dyn Resolver + '_),
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let re = compile(scan)?;
    let mut buf = Vec::new();
    eprintln!("DEBUG scanner {filename} about to read_to_end");
    reader
        .read_to_end(&mut buf)
        .await
        .with_context(|| format!("failed reading {filename}"))?;
    eprintln!("DEBUG scanner {filename} read_to_end done, {} bytes", buf.len());

    let mut cursor = 0usize;
    for caps in re.captures_iter(&buf) {
        let mut named = BTreeMap::new();
        for name in re.capture_names().flatten() {
            let text = caps
                .name(name)
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                .unwrap_or_default();
            named.insert(name.to_string(), text);
        }
        let ver = caps.name(CAPTURE_VERSION).ok_or_else(|| VbumpError::Pattern {
            pattern: re.as_str().to_string(),
            reason: "match did not include the Version capture".to_string(),
        })?;
        let current = String::from_utf8_lossy(ver.as_bytes()).into_owned();
        let new = resolver.resolve(&current, &named).await?;

        // copy up to the Version span, then splice the replacement
        if cursor < ver.start() {
            writer
                .write_all(&buf[cursor..ver.start()])
                .await
                .with_context(|| format!("failed writing {filename}"))?;
            cursor = ver.start();
        }
        if cursor > ver.start() {
            anyhow::bail!(
                "regexp match went backwards in the stream ({} > {}): {}",
                cursor,
                ver.start(),
                re.as_str()
            );
        }
        if new != current {
            writer
                .write_all(new.as_bytes())
                .await
                .with_context(|| format!("failed writing {filename}"))?;
            cursor = ver.end();
        }
    }
    if cursor < buf.len() {
        writer
            .write_all(&buf[cursor..])
            .await
            .with_context(|| format!("failed writing {filename}"))?;
    }
    eprintln!("DEBUG scanner {filename} about to flush");
    writer.flush().await?;
    eprintln!("DEBUG scanner {filename} flush done, returning");
    Ok(())
}
