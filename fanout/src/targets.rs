//! Target file loading.
//!
//! Targets are listed in a TOML file as an array of tables:
//!
//! ```toml
//! [[targets]]
//! id = "i-0123456789abcdef0"
//! label = "web-1"
//! platform = "linux"
//! ```

use anyhow::{Context, Result, bail};
use fanout_common::types::Target;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TargetFile {
    #[serde(default)]
    targets: Vec<Target>,
}

/// Load and sanity-check a target file.
pub fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading target file {}", path.display()))?;
    let file: TargetFile = toml::from_str(&raw)
        .with_context(|| format!("parsing target file {}", path.display()))?;

    if file.targets.is_empty() {
        bail!("target file {} lists no targets", path.display());
    }
    for target in &file.targets {
        if target.id.as_str().trim().is_empty() {
            bail!("target file {} contains a target with an empty id", path.display());
        }
    }
    Ok(file.targets)
}
