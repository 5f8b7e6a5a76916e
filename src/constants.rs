//! Protocol constants for the runtime adapter.
//!
//! This module centralizes the magic numbers of both wire protocols (the
//! discovery pipe and the primary WebSocket transport) so they are
//! discoverable in one place.
//!
//! # Categories
//!
//! - **Transport**: default host/port and close handshake values
//! - **Discovery**: pipe header layout and message type tags
//! - **Timing**: handshake backoff defaults

use std::time::Duration;

// ============================================================================
// Transport
// ============================================================================

/// Port the runtime message bus listens on when no discovery is performed.
pub const DEFAULT_PORT: u16 = 9696;

/// Host the runtime binds its WebSocket server to.
pub const DEFAULT_HOST: &str = "localhost";

/// Close code sent on a graceful shutdown (RFC 6455 "normal closure").
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Reason string sent with the close frame.
///
/// The runtime rejects close frames without a reason, so one is always sent.
pub const CLOSE_REASON: &str = "Closing websocket";

/// Token type announced in both authorization requests.
pub const AUTH_TYPE_FILE_TOKEN: &str = "file-token";

// ============================================================================
// Discovery pipe
// ============================================================================

/// Size of the fixed discovery frame header (five little-endian `u32`s).
pub const PIPE_HEADER_SIZE: usize = 20;

/// Message type of the launcher's hello frame.
pub const PIPE_MSG_HELLO: u32 = 0xFFFF;

/// Message type of a string (JSON) frame.
pub const PIPE_MSG_STRING: u32 = 0;

/// Length/marker prefix preceding the JSON text of a string frame.
pub const PIPE_STRING_PREFIX: usize = 4;

/// Largest payload accepted on the discovery pipe (16 MB).
pub const PIPE_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Prefix of the discovery channel name (suffixed with our PID).
pub const DISCOVERY_CHANNEL_PREFIX: &str = "openfin-adapter-discovery";

// ============================================================================
// Timing
// ============================================================================

/// Base unit of the exponential backoff used while the handshake is pending.
///
/// Waits are `1, 2, 4, ...` units until the session leaves `INIT`.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// How long discovery keeps waiting for the runtime after the launcher exits
/// cleanly without having connected.
pub const LAUNCHER_EXIT_GRACE: Duration = Duration::from_secs(30);

/// Number of backoff attempts after which waiting is logged at debug level.
pub const BACKOFF_QUIET_ATTEMPTS: u32 = 2;
