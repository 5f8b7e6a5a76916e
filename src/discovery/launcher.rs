//! Runtime bootstrap: launch configuration file and launcher process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Child;

/// Runtime launch configuration document.
///
/// ```json
/// {"runtime": {"version": "stable", "arguments": "--v=1"}}
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Runtime selection.
    pub runtime: RuntimeSection,
}

/// The `runtime` section of a [`LaunchConfig`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSection {
    /// Runtime version or release channel.
    pub version: String,
    /// Extra command-line arguments for the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl LaunchConfig {
    /// Launch config for `version` with optional runtime arguments.
    pub fn new(version: &str, arguments: Option<&str>) -> Self {
        Self {
            runtime: RuntimeSection {
                version: version.to_string(),
                arguments: arguments.map(str::to_string),
            },
        }
    }

    /// Write this document to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write launch config {}", path.display()))
    }

    /// Write this document to `<temp dir>/<channel>.json` and return the path.
    pub fn write_temp(&self, channel: &str) -> Result<PathBuf> {
        let path = std::env::temp_dir().join(format!("{channel}.json"));
        self.write_to(&path)?;
        Ok(path)
    }
}

/// Command-line arguments handed to the launcher.
pub fn launcher_args(config_path: &Path, channel: &str) -> Vec<String> {
    vec![
        format!("--config={}", config_path.display()),
        format!("--runtime-information-channel-v6={channel}"),
    ]
}

/// Start the launcher with null stdio.
///
/// The returned child is only watched during discovery; dropping it leaves
/// the process running.
pub fn spawn(launcher: &Path, config_path: &Path, channel: &str) -> Result<Child> {
    let child = tokio::process::Command::new(launcher)
        .args(launcher_args(config_path, channel))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to launch runtime via {}", launcher.display()))?;

    log::info!(
        "[Launcher] Started {} (pid {:?}) with {}",
        launcher.display(),
        child.id(),
        config_path.display()
    );
    Ok(child)
}
