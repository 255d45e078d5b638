use std::fs;
use std::path::Path;

use tracing::info;

use super::OffsetConfig;
use crate::error::{Error, Result};

/// Marker replaced by the resolved offset config as a JSON object literal.
pub const CONFIG_PLACEHOLDER: &str = "@@CONFIG@@";

/// Instrumentation script compiled into the binary.
pub const DEFAULT_SCRIPT: &str = include_str!("../../assets/hook.js");

/// An instrumentation script with a config placeholder.
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    source: String,
}

impl ScriptTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        if !source.contains(CONFIG_PLACEHOLDER) {
            return Err(Error::ScriptTemplate(format!(
                "script has no {} placeholder",
                CONFIG_PLACEHOLDER
            )));
        }
        Ok(Self { source })
    }

    pub fn builtin() -> Self {
        Self {
            source: DEFAULT_SCRIPT.to_string(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = Self::new(fs::read_to_string(path)?)?;
        info!("Loaded script template from {}", path.display());
        Ok(template)
    }

    /// Substitute `config` into the template.
    pub fn render(&self, config: &OffsetConfig) -> Result<String> {
        let json = serde_json::to_string(config)?;
        Ok(self.source.replacen(CONFIG_PLACEHOLDER, &json, 1))
    }
}
