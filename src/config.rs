// ActionVM Configuration
// Serde-backed VM settings, loadable from a JSON file

use crate::error::{AvmError, AvmResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_MOVIE_VERSION: u8 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Movie version; gates a few coercion quirks (undefined renders as "" for <= 6)
    pub version: u8,
    /// Log every executed action and variable access at debug level
    pub verbose_action: bool,
    /// Log every action as a buffer is read
    pub verbose_parse: bool,
    /// Seed for the `random` action; entropy when absent
    pub random_seed: Option<u64>,
    /// Log level used by the command-line runner
    pub log_level: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_MOVIE_VERSION,
            verbose_action: false,
            verbose_parse: false,
            random_seed: None,
            log_level: "warn".to_string(),
        }
    }
}

impl VmConfig {
    pub fn from_json(source: &str) -> AvmResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> AvmResult<Self> {
        let source = fs::read_to_string(path).map_err(|source| AvmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&source)
    }

    /// The string returned by `getVersion()` and stored in `$version`.
    pub fn version_string(&self) -> String {
        format!("ACTIONVM {},0,0,0", self.version)
    }
}
