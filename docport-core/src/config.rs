use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PortError, PortResult};

/// Configuration knobs for export/import runs. Defaults keep artifacts and
/// staged imports around for ten minutes under the system temp directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Directory for archives while they are being built or read.
    pub work_dir: PathBuf,
    /// Directory holding extracted imports that await a user decision.
    pub staging_dir: PathBuf,
    /// Format used when a request does not name one.
    pub default_format: String,
    /// Seconds an exported artifact stays downloadable.
    pub export_expiration_secs: u64,
    /// Seconds a staged import is kept before it is discarded.
    pub staging_expiration_secs: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("docport");
        Self {
            work_dir: root.join("work"),
            staging_dir: root.join("staging"),
            default_format: "gzip".to_string(),
            export_expiration_secs: 600,
            staging_expiration_secs: 600,
        }
    }
}

impl PortConfig {
    /// Read a TOML config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> PortResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw).map_err(|err| {
            PortError::Validation(format!("invalid config {}: {}", path.display(), err))
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `DOCPORT_*` environment overrides on top of the current values.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("DOCPORT_WORK_DIR").filter(|v| !v.is_empty()) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DOCPORT_STAGING_DIR").filter(|v| !v.is_empty()) {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(format) = lookup("DOCPORT_FORMAT").filter(|v| !v.is_empty()) {
            self.default_format = format.trim().to_ascii_lowercase();
        }
        if let Some(secs) = lookup("DOCPORT_EXPORT_EXPIRATION_SECS").and_then(|v| v.parse().ok()) {
            self.export_expiration_secs = secs;
        }
        self
    }

    pub fn export_expiration(&self) -> Duration {
        Duration::from_secs(self.export_expiration_secs)
    }

    pub fn staging_expiration(&self) -> Duration {
        Duration::from_secs(self.staging_expiration_secs)
    }
}
