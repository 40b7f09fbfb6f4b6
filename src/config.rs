//! Relay configuration and live reload
//!
//! The config file lives at `~/.config/notify-relay/config.toml` and is
//! created with defaults on first run. [`ConfigBridge`] watches it and
//! publishes the port on a watch channel whenever the value actually
//! changes; the listener lifecycle subscribes to that channel.

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

pub const DEFAULT_PORT: u16 = 8090;
pub const MIN_PORT: u16 = 1;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the relay listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the config file, creating it with defaults on first run.
    ///
    /// A port below the minimum is not fatal at startup: it is replaced by
    /// the default with a warning so the daemon still comes up.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let mut config = Self::read_from(path)?;
            if config.port < MIN_PORT {
                tracing::warn!(
                    port = config.port,
                    "Configured port is below the minimum ({MIN_PORT}), using {DEFAULT_PORT}"
                );
                config.port = DEFAULT_PORT;
            }
            Ok(config)
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                tracing::warn!("Failed to save default config: {e}");
            }
            Ok(config)
        }
    }

    /// Read and parse an existing config file
    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse config: {e}"))?;
        Ok(config)
    }

    /// Log level to use: an explicit override (CLI flag) wins over the
    /// configured value
    pub fn log_level_or<'a>(&'a self, override_level: Option<&'a str>) -> &'a str {
        override_level.unwrap_or(&self.log_level)
    }

    pub fn config_path() -> Result<PathBuf> {
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs
            .home_dir()
            .join(".config/notify-relay/config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Watches the config file and publishes port changes
///
/// The watch channel always holds the current port; a new value is sent only
/// when the setting actually changed, so subscribers never see spurious
/// wakeups from unrelated edits. Rapid successive edits coalesce in the
/// channel itself.
pub struct ConfigBridge {
    ports: watch::Sender<u16>,
    _watcher: notify::RecommendedWatcher,
}

impl ConfigBridge {
    pub fn new(config_path: PathBuf, initial_port: u16) -> Result<Self> {
        let (ports, _) = watch::channel(initial_port);

        let tx = ports.clone();
        let path = config_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let Ok(event) = event else { return };
                if matches!(event.kind, notify::EventKind::Access(_)) {
                    return;
                }
                Self::reload(&tx, &path);
            })
            .context("Failed to create config watcher")?;

        // Watch the parent directory: editors often replace the file on save
        let dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        Ok(Self {
            ports,
            _watcher: watcher,
        })
    }

    /// Subscribe to port changes; the receiver also exposes the current value
    pub fn subscribe(&self) -> watch::Receiver<u16> {
        self.ports.subscribe()
    }

    /// Re-read the config file and publish the port if it changed.
    ///
    /// A file that is momentarily unreadable or unparseable (mid-save) keeps
    /// the previous value; a reload failure must never take the relay down.
    fn reload(tx: &watch::Sender<u16>, path: &Path) {
        match Config::read_from(path) {
            Ok(config) if config.port < MIN_PORT => {
                tracing::warn!(
                    port = config.port,
                    "Ignoring port below the minimum ({MIN_PORT}), keeping the current port"
                );
            }
            Ok(config) => {
                let old = *tx.borrow();
                if config.port != old {
                    tracing::info!(old, new = config.port, "Port setting changed");
                    let _ = tx.send(config.port);
                }
            }
            Err(e) => {
                tracing::warn!("Ignoring config reload failure: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_run_creates_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(path.exists());

        // Second load reads the file it just wrote
        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.port, DEFAULT_PORT);
        assert_eq!(reloaded.log_level, "info");
    }

    #[test]
    fn test_load_replaces_port_below_minimum_with_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 0\n").unwrap();

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_log_level_override_wins_over_configured() {
        let config = Config {
            port: DEFAULT_PORT,
            log_level: "debug".to_string(),
        };
        assert_eq!(config.log_level_or(None), "debug");
        assert_eq!(config.log_level_or(Some("trace")), "trace");
    }

    #[test]
    fn test_missing_port_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").unwrap();

        let config = Config::read_from(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_reload_publishes_only_real_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let (tx, mut rx) = watch::channel(8090u16);

        // Same port: no wakeup
        std::fs::write(&path, "port = 8090\n").unwrap();
        ConfigBridge::reload(&tx, &path);
        assert!(!rx.has_changed().unwrap());

        // New port: published
        std::fs::write(&path, "port = 9005\n").unwrap();
        ConfigBridge::reload(&tx, &path);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 9005);

        // Broken file mid-save: previous value kept
        std::fs::write(&path, "port = oops").unwrap();
        ConfigBridge::reload(&tx, &path);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 9005);

        // Port below the minimum: previous value kept
        std::fs::write(&path, "port = 0\n").unwrap();
        ConfigBridge::reload(&tx, &path);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 9005);
    }
}
