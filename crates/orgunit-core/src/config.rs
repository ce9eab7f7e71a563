use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name looked up by embedding applications.
pub const CONFIG_FILE_NAME: &str = "orgunit.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: TreeLimits,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Bounds applied to every traversal. Exceeding one fails with
/// [`crate::error::HierarchyError::TreeTooLarge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLimits {
    /// Maximum number of parent links between any unit and its root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum number of direct children of a single unit.
    #[serde(default = "default_max_fan_out")]
    pub max_fan_out: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_fan_out: default_max_fan_out(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a writer waits for a competing write transaction.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Entity type identifiers accepted at creation time.
    #[serde(default)]
    pub entity_types: Vec<String>,
}

/// Load an engine config from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse an engine config from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML for [`EngineConfig`].
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config = toml::from_str::<EngineConfig>(content)?;
    if config.limits.max_depth == 0 || config.limits.max_fan_out == 0 {
        anyhow::bail!("limits.max_depth and limits.max_fan_out must be at least 1");
    }
    Ok(config)
}

const fn default_max_depth() -> usize {
    512
}

const fn default_max_fan_out() -> usize {
    10_000
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.limits.max_depth, 512);
        assert_eq!(config.store.busy_timeout(), Duration::from_secs(5));
        assert!(config.registry.entity_types.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            [limits]
            max_depth = 8

            [registry]
            entity_types = ["Department", "Team"]
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_depth, 8);
        assert_eq!(config.limits.max_fan_out, 10_000);
        assert_eq!(config.registry.entity_types, vec!["Department", "Team"]);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = parse_config("[limits]\nmax_fan_out = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_fan_out"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[limits\nmax_depth = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
