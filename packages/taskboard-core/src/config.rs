/// Tunables for the sync core.
/// Reads core.json from ~/.config/taskboard/core.json (or platform equivalent).
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::trash::MAX_TRASH_RETENTION_HOURS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Reconciler poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polling pause after a local mutation completes.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    #[serde(default = "default_trash_retention_hours")]
    pub trash_retention_hours: i64,
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_cooldown_ms() -> u64 {
    2000
}

fn default_min_password_len() -> usize {
    4
}

fn default_trash_retention_hours() -> i64 {
    24
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            min_password_len: default_min_password_len(),
            trash_retention_hours: default_trash_retention_hours(),
        }
    }
}

impl CoreConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Trash retention, clamped to `1..=MAX_TRASH_RETENTION_HOURS`.
    pub fn trash_retention(&self) -> chrono::Duration {
        let hours = self
            .trash_retention_hours
            .clamp(1, MAX_TRASH_RETENTION_HOURS);
        if hours != self.trash_retention_hours {
            log::warn!(
                "trashRetentionHours {} out of range, using {}",
                self.trash_retention_hours,
                hours
            );
        }
        chrono::Duration::hours(hours)
    }
}

/// Default config path: ~/.config/taskboard/core.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskboard")
        .join("core.json")
}

/// Load config from path. Returns default if file doesn't exist.
pub fn load_config(path: &Path) -> CoreConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {}: {}", path.display(), e);
            CoreConfig::default()
        }),
        Err(_) => {
            log::info!("No config at {}, using defaults", path.display());
            CoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json"));
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"pollIntervalMs": 5000}}"#).unwrap();

        let config = load_config(tmp.path());
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.cooldown_ms, 2000);
        assert_eq!(config.min_password_len, 4);
    }

    #[test]
    fn test_garbage_file_gives_defaults() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "not json").unwrap();
        assert_eq!(load_config(tmp.path()), CoreConfig::default());
    }

    #[test]
    fn test_trash_retention_is_clamped() {
        let huge = CoreConfig {
            trash_retention_hours: 10_000_000_000,
            ..CoreConfig::default()
        };
        assert_eq!(
            huge.trash_retention(),
            chrono::Duration::hours(MAX_TRASH_RETENTION_HOURS)
        );

        let negative = CoreConfig {
            trash_retention_hours: -5,
            ..CoreConfig::default()
        };
        assert_eq!(negative.trash_retention(), chrono::Duration::hours(1));
        assert_eq!(
            CoreConfig::default().trash_retention(),
            chrono::Duration::hours(24)
        );
    }
}
