//! Scanners: stream transformers that rewrite version fields in place.
//!
//! A scanner reads a byte stream, finds version-bearing spans, asks its
//! [`Resolver`] what each version should be, and emits a stream identical to
//! its input except at those spans. Scanners compose by piping: the engine
//! chains one scanner's output into the next one's input, and bytes outside
//! any recognized span pass through untouched.
//!
//! Only one scanner type exists, `regexp` (see [`regexp`]).

pub mod regexp;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ScanEntry;
use crate::core::VbumpError;

/// Callback deciding the replacement for a matched version.
///
/// Receives the currently embedded version and every named capture of the
/// match; returns the version to emit in its place. Resolution usually hits
/// the network, hence async.
#[async_trait]
pub trait Resolver: Send {
    async fn resolve(
        &mut self,
        current: &str,
        captures: &BTreeMap<String, String>,
    ) -> anyhow::Result<String>;
}

/// Run the scanner described by `scan` over `reader`, writing the
/// transformed stream to `writer`.
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
    match scan.scan_type.as_str() {
        "regexp" => regexp::run(scan, filename, reader, writer, resolver).await,
        other => Err(VbumpError::UnknownType {
            kind: "scan",
            name: other.to_string(),
        }
        .into()),
    }
}
