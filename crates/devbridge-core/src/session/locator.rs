use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::DEFAULT_APP_VERSION;
use crate::error::{Error, Result};

/// Command line that identifies the target application's processes.
pub const DEFAULT_PROCESS_PATTERN: &str = "/MacOS/WeChatAppEx.app/Contents/MacOS/WeChatAppEx";

/// Bundle metadata holding the target application's version.
pub const DEFAULT_INFO_PLIST: &str =
    "/Applications/WeChat.app/Contents/MacOS/WeChatAppEx.app/Contents/Info.plist";

/// Finds target processes and the installed application version.
#[async_trait]
pub trait ProcessLocator: Send + Sync {
    async fn find_pids(&self) -> Result<Vec<u32>>;

    async fn app_version(&self) -> Result<String>;
}

/// Probe the application version, falling back to [`DEFAULT_APP_VERSION`].
pub async fn probe_app_version(locator: &dyn ProcessLocator) -> String {
    match locator.app_version().await {
        Ok(version) => {
            info!("Detected application version {}", version);
            version
        }
        Err(e) => {
            warn!(
                "Failed to detect application version ({}), using default {}",
                e, DEFAULT_APP_VERSION
            );
            DEFAULT_APP_VERSION.to_string()
        }
    }
}

/// Locator backed by `pgrep` and `defaults read`.
#[derive(Debug, Clone)]
pub struct PgrepLocator {
    pattern: String,
    info_plist: PathBuf,
}

impl PgrepLocator {
    pub fn new(pattern: impl Into<String>, info_plist: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            info_plist: info_plist.into(),
        }
    }
}

impl Default for PgrepLocator {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_PATTERN, DEFAULT_INFO_PLIST)
    }
}

#[async_trait]
impl ProcessLocator for PgrepLocator {
    async fn find_pids(&self) -> Result<Vec<u32>> {
        let output = Command::new("pgrep")
            .arg("-f")
            .arg(&self.pattern)
            .output()
            .await
            .map_err(|e| Error::ProcessLookup(format!("failed to run pgrep: {}", e)))?;

        // pgrep exits with 1 when nothing matches
        let pids = parse_pids(&String::from_utf8_lossy(&output.stdout));
        if pids.is_empty() {
            return Err(Error::NoTargets(format!(
                "no process matches {:?}",
                self.pattern
            )));
        }
        info!(
            "Found target PIDs: {}",
            pids.iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(pids)
    }

    async fn app_version(&self) -> Result<String> {
        let output = Command::new("defaults")
            .arg("read")
            .arg(&self.info_plist)
            .arg("CFBundleVersion")
            .output()
            .await?;
        let raw = String::from_utf8_lossy(&output.stdout);
        parse_bundle_version(&raw).ok_or_else(|| {
            Error::ProcessLookup(format!("unexpected bundle version {:?}", raw.trim()))
        })
    }
}

/// Targets given explicitly, e.g. on the command line.
#[derive(Debug, Clone)]
pub struct FixedTargets {
    pids: Vec<u32>,
    version: Option<String>,
}

impl FixedTargets {
    pub fn new(pids: Vec<u32>, version: Option<String>) -> Self {
        Self { pids, version }
    }
}

#[async_trait]
impl ProcessLocator for FixedTargets {
    async fn find_pids(&self) -> Result<Vec<u32>> {
        if self.pids.is_empty() {
            return Err(Error::NoTargets("no PIDs given".to_string()));
        }
        Ok(self.pids.clone())
    }

    async fn app_version(&self) -> Result<String> {
        self.version
            .clone()
            .ok_or_else(|| Error::ProcessLookup("no version given".to_string()))
    }
}

/// Parse one pid per line, skipping anything that is not a number.
pub fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Extract the version key from a `CFBundleVersion` such as `1.17078.0`:
/// the second dot-separated component, which must be numeric.
pub fn parse_bundle_version(raw: &str) -> Option<String> {
    let component = raw.trim().split('.').nth(1)?;
    if component.is_empty() || !component.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(component.to_string())
}
