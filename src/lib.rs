//! vbump - version and pinning management
//!
//! vbump keeps versions embedded in project files (Dockerfiles, CI
//! workflows, shell scripts, anything text) in sync with their upstreams.
//! A YAML config declares which files to scan, how to recognize the
//! version fields in them, and where the authoritative version comes
//! from; vbump then reports drift (`check`), rewrites the files in place
//! (`update`), or snapshots the current state into a lock file (`scan`).
//!
//! # Architecture
//!
//! The core is a processing pipeline of stream-preserving scanners:
//!
//! - [`walker`] expands the configured glob patterns over the tree and
//!   yields each matching file, once per matching pattern.
//! - [`scanner`] streams a file through a regex with a mandatory
//!   `Version` capture, invoking a resolve callback per match and
//!   emitting the input byte-for-byte outside the matched spans.
//! - [`processor`] is that callback: it binds a scanner to a
//!   [`source`] provider, expands templates against the match, queries
//!   the provider (cached), reduces the result with [`select`], and
//!   records the outcome in the [`lockfile`] store.
//! - [`engine`] chains processors over in-memory pipes, one task per
//!   processor, drains the final stream, and commits rewrites with an
//!   atomic temp-file-and-rename.
//!
//! Around the pipeline sit [`config`] (schema + legacy upgrade),
//! [`template`] (the small `{{...}}` expansion language used in config
//! fields), [`core`] (error types), and the [`cli`].
//!
//! # Example config
//!
//! ```yaml
//! files:
//!   ".github/workflows/*.yml":
//!     processors: [gha-uses-semver]
//! processors:
//!   gha-uses-semver:
//!     scan: gha-uses
//!     source: gh-tags
//!     key: "{{.ScanMatch.Repo}}"
//!     filter:
//!       expr: '^v\d+\.\d+\.\d+$'
//!     sort:
//!       method: semver
//! scans:
//!   gha-uses:
//!     type: regexp
//!     args:
//!       regexp: 'uses: (?P<Repo>[^@]+)@(?P<Version>v[\d.]+)'
//! sources:
//!   gh-tags:
//!     type: git
//!     args:
//!       url: "https://github.com/{{.ScanMatch.Repo}}.git"
//!       type: tag
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod lockfile;
pub mod processor;
pub mod scanner;
pub mod select;
pub mod source;
pub mod template;
pub mod utils;
pub mod version;
pub mod walker;
