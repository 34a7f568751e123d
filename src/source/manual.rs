//! The `manual` provider: a literal version from the config.
//!
//! One mandatory arg, `Version`; the result is the singleton set
//! `{Version -> Version}`. Useful for pinning a value in one place and
//! fanning it out across files.

use super::{required_arg, Results};
use crate::config::SourceEntry;
use crate::core::VbumpError;

pub fn get(source: &SourceEntry) -> Result<Results, VbumpError> {
    let version = required_arg(source, "Version")?;
    let mut results = Results::default();
    results
        .ver_map
        .insert(version.to_string(), version.to_string());
    Ok(results)
}
