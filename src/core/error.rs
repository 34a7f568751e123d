//! Error handling for vbump
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`VbumpError`]) so callers can match on
//!    precise failure modes (drift detection, offset range checks, ...)
//! 2. **User-friendly reporting** ([`ErrorContext`], [`user_friendly_error`])
//!    so the CLI can print actionable messages instead of debug chains.
//!
//! Modules return [`VbumpError`] at their seams and `anyhow::Result` at the
//! boundaries where context chains are attached with `.with_context(..)`.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vbump operations.
///
/// Variants map onto the failure categories of the engine: configuration
/// references, pattern compilation, file I/O, upstream queries, template
/// evaluation, result selection, lock persistence, and drift detection.
#[derive(Error, Debug)]
pub enum VbumpError {
    /// A `type` field named a provider or scanner kind that does not exist.
    #[error("{kind} type not known: {name}")]
    UnknownType {
        /// What kind of entry carried the type ("source", "scan")
        kind: &'static str,
        /// The unrecognized type value
        name: String,
    },

    /// A config entry referenced another entry by a name that is not defined.
    #[error("{kind} not defined: {name}")]
    MissingReference {
        /// What was being looked up ("processor", "scan", "source")
        kind: &'static str,
        /// The missing name
        name: String,
    },

    /// The config file declared a schema version newer than this build understands.
    #[error("unsupported config version: {0}")]
    UnsupportedConfigVersion(u32),

    /// The config file could not be parsed into the schema.
    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    /// A regular expression or glob pattern failed to compile, or a scan
    /// pattern is missing its mandatory `Version` capture group.
    #[error("pattern error in \"{pattern}\": {reason}")]
    Pattern {
        /// The offending pattern text
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// A filesystem operation failed; the path names the file or directory.
    #[error("{}: {}", .path.display(), .source)]
    Io {
        /// Path of the file or directory the operation touched
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An upstream query failed: network error, unexpected status, empty
    /// result set, or a subprocess exiting non-zero.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A template failed to parse or evaluate.
    #[error("failed to process template \"{template}\": {reason}")]
    Template {
        /// The template text
        template: String,
        /// Parse or evaluation failure detail
        reason: String,
    },

    /// The filter expression removed every candidate version.
    #[error("no results found matching the filter {expr}")]
    FilterEmpty {
        /// The (expanded) filter expression
        expr: String,
    },

    /// No keys survived the sort method's parse step.
    #[error("no valid {method} versions found in {keys:?}")]
    SortEmpty {
        /// The sort method that rejected everything
        method: &'static str,
        /// The keys that were considered
        keys: Vec<String>,
    },

    /// The sort offset points past the end of the selected list.
    #[error("requested offset is too large, {len} matching versions found: {versions:?}")]
    OffsetOutOfRange {
        /// Number of versions available
        len: usize,
        /// The versions that were available
        versions: Vec<String>,
    },

    /// Lock store persistence failed or the store was never initialized.
    #[error("lock store error: {0}")]
    Lock(String),

    /// `check` found at least one version that differs from its upstream.
    #[error("changes detected")]
    Drift,
}

impl VbumpError {
    /// Wrap an `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// An error payload decorated with user-facing help.
///
/// Wraps the original error with an optional suggestion line, so the CLI can
/// render failures in a consistent `error: ... / hint: ...` shape.
pub struct ErrorContext {
    /// The underlying error
    pub error: anyhow::Error,
    /// One-line actionable suggestion, if any applies
    pub suggestion: Option<String>,
}

impl ErrorContext {
    /// Create a context with no suggestion attached.
    pub fn new(error: anyhow::Error) -> Self {
        Self {
            error,
            suggestion: None,
        }
    }

    /// Attach a suggestion line.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Print the error (and its cause chain) to stderr with color.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        for cause in self.error.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".yellow(), cause);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("  {} {}", "hint:".cyan(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`], attaching
/// suggestions for the failure modes a user can act on directly.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let suggestion = match error.downcast_ref::<VbumpError>() {
        Some(VbumpError::Drift) => {
            Some("run `vbump update` to apply the new versions".to_string())
        }
        Some(VbumpError::UnsupportedConfigVersion(_)) => {
            Some("upgrade vbump or lower the `version` field in the config".to_string())
        }
        Some(VbumpError::MissingReference { kind, name }) => {
            Some(format!("define a {kind} named \"{name}\" in the config"))
        }
        Some(VbumpError::Pattern { .. }) => {
            Some("scan patterns must contain a (?P<Version>...) capture group".to_string())
        }
        _ => None,
    };
    let ctx = ErrorContext::new(error);
    match suggestion {
        Some(s) => ctx.with_suggestion(s),
        None => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failure() {
        let err = VbumpError::MissingReference {
            kind: "processor",
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "processor not defined: missing");

        let err = VbumpError::FilterEmpty {
            expr: "^v1".to_string(),
        };
        assert_eq!(err.to_string(), "no results found matching the filter ^v1");

        let err = VbumpError::OffsetOutOfRange {
            len: 2,
            versions: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("2 matching versions found"));
    }

    #[test]
    fn io_errors_carry_the_path() {
        let err = VbumpError::io(
            "/tmp/missing.yml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().starts_with("/tmp/missing.yml"));
    }

    #[test]
    fn drift_gets_a_suggestion() {
        let ctx = user_friendly_error(anyhow::Error::from(VbumpError::Drift));
        assert!(ctx.suggestion.is_some());
    }
}
