//! Configuration loading.
//!
//! Reads `config.json` from the adapter's config directory and applies
//! `OPENFIN_*` environment overrides on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::constants::{DEFAULT_BACKOFF_UNIT, DEFAULT_HOST, DEFAULT_PORT};
use crate::session::SessionOptions;

/// Runtime version requested when none is configured.
const DEFAULT_RUNTIME_VERSION: &str = "stable";

/// How to bootstrap the runtime before connecting.
///
/// Present only when the adapter should launch the runtime and discover its
/// port; otherwise the configured port is used directly.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Bootstrap executable.
    pub launcher: PathBuf,
    /// Runtime version written to the generated launch config.
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
    /// Extra runtime arguments written to the generated launch config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_arguments: Option<String>,
    /// Existing launch config to pass instead of generating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_config: Option<PathBuf>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            launcher: default_launcher().unwrap_or_else(|| PathBuf::from("OpenFinRVM")),
            runtime_version: default_runtime_version(),
            runtime_arguments: None,
            launch_config: None,
        }
    }
}

fn default_runtime_version() -> String {
    DEFAULT_RUNTIME_VERSION.to_string()
}

/// Platform default bootstrap executable, if there is one.
pub fn default_launcher() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_local_dir().map(|dir| dir.join("OpenFin").join("OpenFinRVM.exe"))
    } else {
        None
    }
}

/// Adapter configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Host the runtime bus listens on.
    pub host: String,
    /// Bus port used when no discovery is performed.
    pub port: u16,
    /// Launch the runtime and discover its port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchSettings>,
    /// First handshake backoff wait in milliseconds.
    pub backoff_unit_ms: u64,
    /// Give up waiting for the handshake after this many attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_attempts: Option<u32>,
    /// Close sessions still handshaking after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            launch: None,
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT.as_millis() as u64,
            max_wait_attempts: None,
            handshake_timeout_secs: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `OPENFIN_CONFIG_DIR` overrides the platform config dir
    /// (e.g. `~/.config/openfin-adapter` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("OPENFIN_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("openfin-adapter"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is an
    /// error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit file, without overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `OPENFIN_*` overrides looked up through `var`.
    ///
    /// Unparseable numeric values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("OPENFIN_HOST") {
            self.host = host;
        }

        if let Some(port) = var("OPENFIN_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }

        if let Some(backoff) = var("OPENFIN_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.backoff_unit_ms = backoff;
        }

        if let Some(timeout) = var("OPENFIN_HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.handshake_timeout_secs = Some(timeout);
        }

        if let Some(launcher) = var("OPENFIN_LAUNCHER") {
            self.launch.get_or_insert_with(LaunchSettings::default).launcher =
                PathBuf::from(launcher);
        }

        if let Some(version) = var("OPENFIN_RUNTIME_VERSION") {
            self.launch
                .get_or_insert_with(LaunchSettings::default)
                .runtime_version = version;
        }

        if let Some(launch_config) = var("OPENFIN_LAUNCH_CONFIG") {
            self.launch
                .get_or_insert_with(LaunchSettings::default)
                .launch_config = Some(PathBuf::from(launch_config));
        }
    }

    /// Session tunables derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            max_wait_attempts: self.max_wait_attempts,
            handshake_timeout: self.handshake_timeout_secs.map(Duration::from_secs),
        }
    }
}
