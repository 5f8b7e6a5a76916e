//! System API: single-call runtime operations.
//!
//! Every operation is a [`SystemAction`] row: wire action name, payload
//! builder and result extractor. [`System`] sends them through the session
//! and applies the extractor to the acknowledgement.

use serde_json::{json, Map, Value};

use crate::error::SessionResult;
use crate::session::Session;

/// How an acknowledgement payload becomes the operation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extract {
    /// `payload.data`
    Data,
    /// `payload.data.uuid`
    DataUuid,
    /// Nothing; the ack only signals completion.
    Nothing,
}

/// Parameters of `download-asset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    /// Download URL.
    pub src: String,
    /// Name the asset is stored under.
    pub alias: String,
    /// Asset version.
    pub version: String,
    /// Executable within the asset, if any.
    pub target: Option<String>,
    /// Arguments for `target`.
    pub args: Option<String>,
}

/// A runtime system operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAction {
    /// Runtime version string.
    GetVersion,
    /// Clear the runtime cache.
    ClearCache,
    /// Delete the cache when the runtime exits.
    DeleteCacheOnExit,
    /// All windows of all applications.
    GetAllWindows,
    /// All running applications.
    GetAllApplications,
    /// Connected external applications.
    GetAllExternalApplications,
    /// The runtime's command line.
    GetCommandLineArguments,
    /// Machine identifier.
    GetDeviceId,
    /// Environment variables of the runtime process.
    GetEnvironmentVariable,
    /// Contents of the named log file.
    GetLog {
        /// Log file name.
        name: String,
    },
    /// Available log files.
    GetLogList,
    /// Monitor layout.
    GetMonitorInfo,
    /// Cursor position.
    GetMousePosition,
    /// Runtime process snapshot.
    GetProcessList,
    /// Proxy configuration.
    GetProxySettings,
    /// Runtime version manager details.
    GetRvmInfo,
    /// Start an external process; result is its uuid.
    LaunchExternalProcess {
        /// Executable path.
        path: String,
        /// Command-line arguments.
        arguments: String,
    },
    /// Start monitoring an existing process; result is its uuid.
    MonitorExternalProcess {
        /// OS process id.
        pid: u32,
    },
    /// Terminate a launched or monitored process.
    TerminateExternalProcess {
        /// Process uuid.
        uuid: String,
    },
    /// Stop monitoring a process without terminating it.
    ReleaseExternalProcess {
        /// Process uuid.
        uuid: String,
    },
    /// Write to the runtime log.
    Log {
        /// Log level (`info`, `warning`, `error`).
        level: String,
        /// Text to write.
        message: String,
    },
    /// Open a URL in the default browser.
    OpenUrlWithBrowser {
        /// URL to open.
        url: String,
    },
    /// Change proxy settings.
    UpdateProxySettings {
        /// Proxy host.
        address: String,
        /// Proxy port.
        port: u16,
        /// Proxy type.
        proxy_type: String,
    },
    /// Download an asset.
    DownloadAsset(AssetRequest),
    /// Resolve an entity uuid.
    ResolveUuid {
        /// Entity uuid.
        uuid: String,
    },
    /// Any other action, sent with an empty payload.
    Other(String),
}

impl SystemAction {
    /// Wire action name.
    pub fn action_name(&self) -> &str {
        match self {
            Self::GetVersion => "get-version",
            Self::ClearCache => "clear-cache",
            Self::DeleteCacheOnExit => "delete-cache-request",
            Self::GetAllWindows => "get-all-windows",
            Self::GetAllApplications => "get-all-applications",
            Self::GetAllExternalApplications => "get-all-external-applications",
            Self::GetCommandLineArguments => "get-command-line-arguments",
            Self::GetDeviceId => "get-device-id",
            Self::GetEnvironmentVariable => "get-environment-variable",
            Self::GetLog { .. } => "view-log",
            Self::GetLogList => "list-logs",
            Self::GetMonitorInfo => "get-monitor-info",
            Self::GetMousePosition => "get-mouse-position",
            Self::GetProcessList => "process-snapshot",
            Self::GetProxySettings => "get-proxy-settings",
            Self::GetRvmInfo => "get-rvm-info",
            Self::LaunchExternalProcess { .. } => "launch-external-process",
            Self::MonitorExternalProcess { .. } => "monitor-external-process",
            Self::TerminateExternalProcess { .. } => "terminate-external-process",
            Self::ReleaseExternalProcess { .. } => "release-external-process",
            Self::Log { .. } => "write-to-log",
            Self::OpenUrlWithBrowser { .. } => "open-url-with-browser",
            Self::UpdateProxySettings { .. } => "update-proxy",
            Self::DownloadAsset(_) => "download-asset",
            Self::ResolveUuid { .. } => "resolve-uuid",
            Self::Other(name) => name,
        }
    }

    /// Request payload.
    pub fn payload(&self) -> Value {
        match self {
            Self::GetLog { name } => json!({ "name": name }),
            Self::LaunchExternalProcess { path, arguments } => {
                json!({ "path": path, "arguments": arguments })
            }
            Self::MonitorExternalProcess { pid } => json!({ "pid": pid }),
            Self::TerminateExternalProcess { uuid } | Self::ReleaseExternalProcess { uuid } => {
                json!({ "uuid": uuid })
            }
            Self::Log { level, message } => json!({ "level": level, "message": message }),
            Self::OpenUrlWithBrowser { url } => json!({ "url": url }),
            Self::UpdateProxySettings {
                address,
                port,
                proxy_type,
            } => json!({
                "proxyAddress": address,
                "proxyPort": port,
                "type": proxy_type,
            }),
            Self::DownloadAsset(asset) => {
                let mut request = Map::new();
                request.insert("src".into(), json!(asset.src));
                request.insert("alias".into(), json!(asset.alias));
                request.insert("version".into(), json!(asset.version));
                if let Some(target) = &asset.target {
                    request.insert("target".into(), json!(target));
                }
                if let Some(args) = &asset.args {
                    request.insert("args".into(), json!(args));
                }
                Value::Object(request)
            }
            Self::ResolveUuid { uuid } => json!({ "entityKey": uuid }),
            _ => json!({}),
        }
    }

    fn extract(&self) -> Extract {
        match self {
            Self::LaunchExternalProcess { .. } | Self::MonitorExternalProcess { .. } => {
                Extract::DataUuid
            }
            Self::ReleaseExternalProcess { .. }
            | Self::Log { .. }
            | Self::OpenUrlWithBrowser { .. }
            | Self::UpdateProxySettings { .. }
            | Self::DownloadAsset(_) => Extract::Nothing,
            _ => Extract::Data,
        }
    }

    /// Turn an acknowledgement payload into the operation's result.
    ///
    /// Unsuccessful acknowledgements are logged; their `data` (usually
    /// absent) is still returned.
    pub fn parse_response(&self, ack: Option<Value>) -> Option<Value> {
        let ack = ack?;
        if ack.get("success").and_then(Value::as_bool) == Some(false) {
            log::warn!(
                "[System] '{}' failed: {}",
                self.action_name(),
                ack.get("reason").and_then(Value::as_str).unwrap_or("no reason given")
            );
        }

        match self.extract() {
            Extract::Data => ack.get("data").cloned(),
            Extract::DataUuid => ack.get("data")?.get("uuid").cloned(),
            Extract::Nothing => None,
        }
    }
}

/// System operations over a session.
#[derive(Debug, Clone)]
pub struct System {
    session: Session,
}

impl System {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run `action` and extract its result.
    pub async fn call(&self, action: SystemAction) -> SessionResult<Option<Value>> {
        let ack = self
            .session
            .invoke(action.action_name(), action.payload())
            .await?;
        Ok(action.parse_response(ack))
    }

    /// Runtime version string.
    pub async fn get_version(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetVersion).await
    }

    /// Clear the runtime cache.
    pub async fn clear_cache(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::ClearCache).await
    }

    /// Delete the cache when the runtime exits.
    pub async fn delete_cache_on_exit(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::DeleteCacheOnExit).await
    }

    /// All windows of all applications.
    pub async fn get_all_windows(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetAllWindows).await
    }

    /// All running applications.
    pub async fn get_all_applications(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetAllApplications).await
    }

    /// Connected external applications.
    pub async fn get_all_external_applications(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetAllExternalApplications).await
    }

    /// The runtime's command line.
    pub async fn get_command_line_arguments(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetCommandLineArguments).await
    }

    /// Machine identifier.
    pub async fn get_device_id(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetDeviceId).await
    }

    /// Environment variables of the runtime process.
    pub async fn get_environment_variable(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetEnvironmentVariable).await
    }

    /// Contents of log file `name`.
    pub async fn get_log(&self, name: &str) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetLog {
            name: name.to_string(),
        })
        .await
    }

    /// Available log files.
    pub async fn get_log_list(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetLogList).await
    }

    /// Monitor layout.
    pub async fn get_monitor_info(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetMonitorInfo).await
    }

    /// Cursor position.
    pub async fn get_mouse_position(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetMousePosition).await
    }

    /// Runtime process snapshot.
    pub async fn get_process_list(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetProcessList).await
    }

    /// Proxy configuration.
    pub async fn get_proxy_settings(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetProxySettings).await
    }

    /// Runtime version manager details.
    pub async fn get_rvm_info(&self) -> SessionResult<Option<Value>> {
        self.call(SystemAction::GetRvmInfo).await
    }

    /// Start an external process; resolves with its uuid.
    pub async fn launch_external_process(
        &self,
        path: &str,
        arguments: &str,
    ) -> SessionResult<Option<Value>> {
        self.call(SystemAction::LaunchExternalProcess {
            path: path.to_string(),
            arguments: arguments.to_string(),
        })
        .await
    }

    /// Monitor an existing process; resolves with its uuid.
    pub async fn monitor_external_process(&self, pid: u32) -> SessionResult<Option<Value>> {
        self.call(SystemAction::MonitorExternalProcess { pid }).await
    }

    /// Terminate a launched or monitored process.
    pub async fn terminate_external_process(&self, uuid: &str) -> SessionResult<Option<Value>> {
        self.call(SystemAction::TerminateExternalProcess {
            uuid: uuid.to_string(),
        })
        .await
    }

    /// Stop monitoring a process.
    pub async fn release_external_process(&self, uuid: &str) -> SessionResult<()> {
        self.call(SystemAction::ReleaseExternalProcess {
            uuid: uuid.to_string(),
        })
        .await
        .map(drop)
    }

    /// Write to the runtime log.
    pub async fn log(&self, level: &str, message: &str) -> SessionResult<()> {
        self.call(SystemAction::Log {
            level: level.to_string(),
            message: message.to_string(),
        })
        .await
        .map(drop)
    }

    /// Open `url` in the default browser.
    pub async fn open_url_with_browser(&self, url: &str) -> SessionResult<()> {
        self.call(SystemAction::OpenUrlWithBrowser {
            url: url.to_string(),
        })
        .await
        .map(drop)
    }

    /// Change proxy settings.
    pub async fn update_proxy_settings(
        &self,
        address: &str,
        port: u16,
        proxy_type: &str,
    ) -> SessionResult<()> {
        self.call(SystemAction::UpdateProxySettings {
            address: address.to_string(),
            port,
            proxy_type: proxy_type.to_string(),
        })
        .await
        .map(drop)
    }

    /// Download an asset.
    pub async fn download_asset(&self, asset: AssetRequest) -> SessionResult<()> {
        self.call(SystemAction::DownloadAsset(asset)).await.map(drop)
    }

    /// Resolve an entity uuid.
    pub async fn resolve_uuid(&self, uuid: &str) -> SessionResult<Option<Value>> {
        self.call(SystemAction::ResolveUuid {
            uuid: uuid.to_string(),
        })
        .await
    }
}
