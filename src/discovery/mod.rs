//! Port discovery.
//!
//! When the adapter is configured to launch the runtime, it learns the bus
//! port over a one-shot local channel before opening the WebSocket:
//!
//! 1. bind a local endpoint named after our PID
//! 2. start the launcher, passing it the launch config and channel name
//! 3. accept the launcher's connection
//! 4. read its hello frame and echo it back routed from our PID
//! 5. read the runtime information frame and take `payload.port`
//!
//! Without launch settings (or on a platform with no endpoint) the
//! configured port is used as-is. Once attempted, any discovery failure is
//! fatal.

pub mod endpoint;
pub mod launcher;
pub mod wire;

use anyhow::Result;

use crate::config::{Config, LaunchSettings};

pub use endpoint::channel_name;
pub use launcher::LaunchConfig;

/// Port the session should connect to.
pub async fn resolve_port(config: &Config) -> Result<u16> {
    let Some(launch) = &config.launch else {
        return Ok(config.port);
    };

    if !endpoint::SUPPORTED {
        log::warn!(
            "[Discovery] Not supported on this platform, using port {}",
            config.port
        );
        return Ok(config.port);
    }

    discover_port(launch).await
}

/// Launch the runtime and run the discovery exchange.
#[cfg(any(unix, windows))]
pub async fn discover_port(launch: &LaunchSettings) -> Result<u16> {
    use anyhow::Context;

    use crate::constants::LAUNCHER_EXIT_GRACE;

    let pid = std::process::id();
    let channel = channel_name(pid);
    let endpoint = endpoint::Endpoint::bind(&channel)?;

    let config_path = match &launch.launch_config {
        Some(path) => path.clone(),
        None => LaunchConfig::new(&launch.runtime_version, launch.runtime_arguments.as_deref())
            .write_temp(&channel)?,
    };
    let mut child = launcher::spawn(&launch.launcher, &config_path, &channel)?;

    let accepting = endpoint.accept();
    tokio::pin!(accepting);

    let mut stream = tokio::select! {
        stream = &mut accepting => stream?,
        status = child.wait() => {
            let status = status.context("Failed to wait for the launcher")?;
            if !status.success() {
                anyhow::bail!("Launcher exited with {status} before the runtime connected");
            }
            log::info!(
                "[Discovery] Launcher exited, waiting up to {:?} for the runtime",
                LAUNCHER_EXIT_GRACE
            );
            tokio::time::timeout(LAUNCHER_EXIT_GRACE, &mut accepting)
                .await
                .context("Runtime never connected to the discovery channel")??
        }
    };

    wire::exchange(&mut stream, pid)
        .await
        .context("Port discovery failed")
}

/// Discovery is unavailable on this platform.
#[cfg(not(any(unix, windows)))]
pub async fn discover_port(_launch: &LaunchSettings) -> Result<u16> {
    anyhow::bail!("Port discovery is not supported on this platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_launch_settings_uses_configured_port() {
        let config = Config {
            port: 9701,
            ..Config::default()
        };
        assert_eq!(resolve_port(&config).await.unwrap(), 9701);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_launch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            launch: Some(LaunchSettings {
                launcher: dir.path().join("missing-rvm"),
                launch_config: Some(dir.path().join("app.json")),
                ..LaunchSettings::default()
            }),
            ..Config::default()
        };
        assert!(resolve_port(&config).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launcher_failing_before_connect_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let launch = LaunchSettings {
            launcher: "false".into(),
            launch_config: Some(dir.path().join("app.json")),
            ..LaunchSettings::default()
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            discover_port(&launch),
        )
        .await
        .expect("discovery kept waiting after the launcher exited");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("before the runtime connected"));
    }
}
