//! Local receiving endpoint for the discovery channel.
//!
//! Windows uses a named pipe `\\.\pipe\<channel>`; Unix uses a domain socket
//! `<temp dir>/<channel>.sock`. The endpoint accepts exactly one connection
//! (from the launcher) and is then discarded.

use crate::constants::DISCOVERY_CHANNEL_PREFIX;

/// Whether this platform has a discovery endpoint.
pub const SUPPORTED: bool = cfg!(any(unix, windows));

/// Channel name for the given process id.
pub fn channel_name(pid: u32) -> String {
    format!("{DISCOVERY_CHANNEL_PREFIX}-{pid}")
}

#[cfg(unix)]
pub use unix::Endpoint;

#[cfg(windows)]
pub use windows::Endpoint;

#[cfg(unix)]
mod unix {
    use std::path::{Path, PathBuf};

    use anyhow::{Context, Result};
    use scopeguard::ScopeGuard;
    use tokio::net::{UnixListener, UnixStream};

    fn remove_socket_file(path: PathBuf) {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("[Discovery] Could not remove {}: {e}", path.display());
            }
        }
    }

    /// Unix domain socket endpoint. The socket file is removed on drop.
    #[derive(Debug)]
    pub struct Endpoint {
        path: ScopeGuard<PathBuf, fn(PathBuf)>,
        listener: UnixListener,
    }

    impl Endpoint {
        /// Bind `<temp dir>/<channel>.sock`.
        pub fn bind(channel: &str) -> Result<Self> {
            Self::bind_at(std::env::temp_dir().join(format!("{channel}.sock")))
        }

        /// Bind at an explicit socket path, replacing a stale file.
        pub fn bind_at(path: PathBuf) -> Result<Self> {
            if path.exists() {
                std::fs::remove_file(&path).with_context(|| {
                    format!("Failed to remove stale socket: {}", path.display())
                })?;
            }

            let listener = UnixListener::bind(&path)
                .with_context(|| format!("Failed to bind socket: {}", path.display()))?;
            log::debug!("[Discovery] Listening on {}", path.display());

            Ok(Self {
                path: scopeguard::guard(path, remove_socket_file as fn(PathBuf)),
                listener,
            })
        }

        /// Socket path the launcher connects to.
        pub fn location(&self) -> &Path {
            &self.path
        }

        /// Accept the launcher's connection and release the endpoint.
        pub async fn accept(self) -> Result<UnixStream> {
            let (stream, _addr) = self
                .listener
                .accept()
                .await
                .context("Failed to accept discovery connection")?;
            log::debug!("[Discovery] Launcher connected");
            Ok(stream)
        }
    }
}

#[cfg(windows)]
mod windows {
    use anyhow::{Context, Result};
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    /// Named pipe endpoint.
    #[derive(Debug)]
    pub struct Endpoint {
        name: String,
        server: NamedPipeServer,
    }

    impl Endpoint {
        /// Create the pipe `\\.\pipe\<channel>`.
        pub fn bind(channel: &str) -> Result<Self> {
            let name = format!(r"\\.\pipe\{channel}");
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&name)
                .with_context(|| format!("Failed to create named pipe {name}"))?;
            log::debug!("[Discovery] Listening on {}", name);
            Ok(Self { name, server })
        }

        /// Full pipe name.
        pub fn location(&self) -> &str {
            &self.name
        }

        /// Wait for the launcher to connect.
        pub async fn accept(self) -> Result<NamedPipeServer> {
            self.server
                .connect()
                .await
                .with_context(|| format!("Failed to accept connection on {}", self.name))?;
            log::debug!("[Discovery] Launcher connected");
            Ok(self.server)
        }
    }
}
