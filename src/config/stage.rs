//! Per-stage flag settings.
//!
//! A stage is identified by its flag key and the version of its
//! implementation. Settings can be built in code or read from TOML:
//!
//! ```toml
//! [stage]
//! key = "ocr"
//! version = "2.1.0"
//! tolerance_secs = 30     # optional, defaults to 10
//! store_timeout_ms = 500  # optional
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::DEFAULT_TOLERANCE;
use crate::error::{Error, Result};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct StageFile {
    stage: StageToml,
}

#[derive(Debug, Deserialize)]
struct StageToml {
    key: String,
    version: String,
    tolerance_secs: Option<u64>,
    store_timeout_ms: Option<u64>,
}

/// Identity and tuning of one processing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub key: String,
    pub version: String,
    pub tolerance: Duration,
    pub store_timeout: Option<Duration>,
}

impl StageConfig {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
            tolerance: DEFAULT_TOLERANCE,
            store_timeout: None,
        }
    }

    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Parse a `[stage]` table.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: StageFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad stage config: {e}")))?;
        let stage = file.stage;
        let config = Self {
            key: stage.key,
            version: stage.version,
            tolerance: stage
                .tolerance_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TOLERANCE),
            store_timeout: stage.store_timeout_ms.map(Duration::from_millis),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a stage file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read stage config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::Config("stage key must not be empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Config(format!(
                "stage {:?} has an empty version",
                self.key
            )));
        }
        Ok(())
    }
}
