//! CLI configuration.

use anyhow::{ensure, Context, Result};
use driftsync_core::{Timestamp, DEFAULT_MAX_DRIFT};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Node id for a freshly created clock; random when unset
    pub node: Option<String>,

    /// Maximum tolerated clock drift
    pub max_drift: Duration,

    /// Location of the persisted clock
    pub clock_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            node: None,
            max_drift: DEFAULT_MAX_DRIFT,
            clock_path: PathBuf::from("./clock.json"),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DRIFTSYNC_NODE`: Node id for new clocks
    /// - `DRIFTSYNC_MAX_DRIFT_MS`: Drift limit in milliseconds
    /// - `DRIFTSYNC_CLOCK_PATH`: Clock file path
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(node) = lookup("DRIFTSYNC_NODE") {
            ensure!(
                Timestamp::is_valid_node(&node),
                "Invalid DRIFTSYNC_NODE: {node:?} (up to 16 ASCII letters or digits)"
            );
            config.node = Some(node);
        }

        if let Some(drift) = lookup("DRIFTSYNC_MAX_DRIFT_MS") {
            let ms: u64 = drift
                .trim()
                .parse()
                .context("Invalid DRIFTSYNC_MAX_DRIFT_MS")?;
            config.max_drift = Duration::from_millis(ms);
        }

        if let Some(path) = lookup("DRIFTSYNC_CLOCK_PATH") {
            config.clock_path = PathBuf::from(path);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<CliConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(load(&[]).unwrap(), CliConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("DRIFTSYNC_NODE", "abcdef0123456789"),
            ("DRIFTSYNC_MAX_DRIFT_MS", "1500"),
            ("DRIFTSYNC_CLOCK_PATH", "/tmp/replica.json"),
        ])
        .unwrap();

        assert_eq!(config.node.as_deref(), Some("abcdef0123456789"));
        assert_eq!(config.max_drift, Duration::from_millis(1500));
        assert_eq!(config.clock_path, PathBuf::from("/tmp/replica.json"));
    }

    #[test]
    fn rejects_bad_drift() {
        let err = load(&[("DRIFTSYNC_MAX_DRIFT_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("DRIFTSYNC_MAX_DRIFT_MS"));
    }

    #[test]
    fn rejects_node_ids_that_would_not_parse_back() {
        for node in ["replica-1", "0123456789abcdef0", "nodé"] {
            let err = load(&[("DRIFTSYNC_NODE", node)]).unwrap_err();
            assert!(err.to_string().contains("DRIFTSYNC_NODE"), "{node}");
        }
    }
}
