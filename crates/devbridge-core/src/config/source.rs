use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use super::{OffsetConfig, resolve_and_validate};
use crate::error::Result;

/// Application version assumed when the installed version cannot be probed.
pub const DEFAULT_APP_VERSION: &str = "17078";

/// Offset file for a given application version inside `config_dir`.
pub fn config_path_for_version(config_dir: &Path, version: &str) -> PathBuf {
    config_dir.join(format!("addresses.{}.json", version))
}

/// Read a raw offset file without interpreting it.
pub fn load_raw_config(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&content)?;
    debug!("Read offset config from {}", path.display());
    Ok(raw)
}

/// Load, resolve and validate the offset file at `path` for `arch`.
pub fn load_offset_config(path: &Path, arch: &str) -> Result<OffsetConfig> {
    let raw = load_raw_config(path)?;
    let config = resolve_and_validate(&raw, arch)?;
    info!(
        "Loaded offset config {} (version: {}, arch: {})",
        path.display(),
        config
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        config.source_arch.as_deref().unwrap_or(arch)
    );
    Ok(config)
}
