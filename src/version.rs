//! Build metadata reported by `--version`.

use serde::Serialize;
use std::io::Write;

/// Build information, fixed at compile time.
///
/// `GIT_VERSION`, `GIT_COMMIT` and `BUILD_DATE` are read from the build
/// environment; the compiler version comes from `build.rs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub git_version: &'static str,
    pub git_commit: &'static str,
    pub build_date: &'static str,
    pub rust_version: &'static str,
    pub compiler: &'static str,
    pub platform: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            git_version: option_env!("GIT_VERSION").unwrap_or("pre-release"),
            git_commit: option_env!("GIT_COMMIT").unwrap_or(""),
            build_date: option_env!("BUILD_DATE").unwrap_or(""),
            rust_version: env!("SNAPSHOT_RUSTC_VERSION"),
            compiler: "rustc",
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// Writes the record as a single JSON line.
    pub fn write_to<W: Write>(&self, mut out: W) -> anyhow::Result<()> {
        let data = serde_json::to_string(self)?;
        writeln!(out, "{data}")?;
        Ok(())
    }
}
