//! Clock file persistence.

use crate::config::CliConfig;
use anyhow::{Context, Result};
use driftsync_core::{make_client_id, Clock, ClockOptions};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Load the clock stored at `path`.
///
/// A missing file yields a fresh clock for the configured node. Unreadable
/// contents fall back to a zero clock, as [`Clock::deserialize`] does.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read, or if a fresh clock
/// is needed and the configured node id is invalid.
pub fn load(path: &Path, config: &CliConfig) -> Result<Clock> {
    let mut clock = match fs::read_to_string(path) {
        Ok(contents) => Clock::deserialize(&contents),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let node = config.node.clone().unwrap_or_else(make_client_id);
            tracing::debug!(path = %path.display(), %node, "no clock file, starting fresh");
            Clock::new(ClockOptions::with_node(node)).context("Invalid DRIFTSYNC_NODE")?
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    clock.set_max_drift(config.max_drift);
    Ok(clock)
}

/// Write `clock` to `path`, replacing any previous contents.
///
/// # Errors
///
/// Returns error if the file cannot be written.
pub fn save(path: &Path, clock: &Clock) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, clock.serialize())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
