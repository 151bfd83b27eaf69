use crate::error::{RegistrarError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the optional configuration file inside a data directory.
pub const CONFIG_FILE: &str = "registrar.yaml";

/// Store-level settings, parsed from `registrar.yaml` when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Counters start here; the first allocated value is `sequence_base + 1`.
    pub sequence_base: i64,
    /// How long a write waits for another handle's lock before failing.
    pub busy_timeout_ms: u64,
    /// Reject enrollments whose student or course does not exist.
    pub validate_enrollment_refs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            sequence_base: 0,
            busy_timeout_ms: 5_000,
            validate_enrollment_refs: true,
        }
    }
}

impl StoreConfig {
    /// Load the config from a data directory. A missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(StoreConfig::default());
        }
        let content = std::fs::read_to_string(&path)?;
        parse_config_str(&content)
    }
}

/// Parse a YAML config string into a StoreConfig
pub fn parse_config_str(content: &str) -> Result<StoreConfig> {
    // An empty file deserializes to null, which serde_yaml rejects for structs.
    if content.trim().is_empty() {
        return Ok(StoreConfig::default());
    }
    let config: StoreConfig = serde_yaml::from_str(content)?;
    if config.sequence_base < 0 {
        return Err(RegistrarError::Config(format!(
            "sequence_base must not be negative (got {})",
            config.sequence_base
        )));
    }
    Ok(config)
}
