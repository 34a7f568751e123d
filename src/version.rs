//! Build information for the `version` subcommand.

use serde::Serialize;

/// Template data for the version banner; fields are addressed from the
/// format template as `{{.Version}}`, `{{.Os}}`, etc.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    #[serde(rename = "Name")]
    pub name: &'static str,
    #[serde(rename = "Version")]
    pub version: &'static str,
    #[serde(rename = "Os")]
    pub os: &'static str,
    #[serde(rename = "Arch")]
    pub arch: &'static str,
}

/// Default banner format.
pub const DEFAULT_FORMAT: &str = "{{.Name}} {{.Version}} {{.Os}}/{{.Arch}}";

pub fn info() -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}
