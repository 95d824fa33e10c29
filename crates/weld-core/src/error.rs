//! Unified error types for the Weld core.
//!
//! The taxonomy mirrors how failures propagate at runtime: only
//! [`SetupError`] ever crosses the server boundary; everything else is
//! recovered locally, logged, and (where possible) surfaced to the peer.

use thiserror::Error;

// =============================================================================
// Fatal setup errors
// =============================================================================

/// Errors that abort server startup. These are the only errors that
/// surface to the caller of `Server::run`.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed {
        /// The `host:port` that could not be bound.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// A route pattern could not be compiled.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoutePattern { pattern: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

// =============================================================================
// Protocol violations
// =============================================================================

/// A violation of the wire protocol by a peer. The offending connection is
/// dropped; the accept loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The first bytes of a connection matched neither HTTP nor a
    /// WebSocket upgrade.
    #[error("unrecognized protocol preamble")]
    UnknownProtocol,

    /// The HTTP request could not be parsed.
    #[error("malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// A frame carried an opcode outside the RFC 6455 set.
    #[error("unknown WebSocket opcode {0:#x}")]
    UnknownOpcode(u8),

    /// A single frame declared a payload beyond the hard frame cap.
    #[error("frame payload of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: u64, max: u64 },

    /// An assembled message (or the undecoded residual) exceeded the
    /// configured maximum message size.
    #[error("message of {len} bytes exceeds the configured limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// A continuation frame arrived with no fragmented message open.
    #[error("continuation frame without a preceding fragment")]
    StrayContinuation,

    /// A new data frame arrived while a fragmented message was still open.
    #[error("data frame interleaved into an open fragment sequence")]
    InterleavedFragment,

    /// The upgrade request failed a handshake check.
    #[error("handshake rejected ({status}): {reason}")]
    HandshakeRejected { status: u16, reason: String },

    /// A decoded payload did not match the `{"event":..,"data":{..}}` shape.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

// =============================================================================
// Transient I/O
// =============================================================================

/// A failed delivery to a single client. The client is disconnected; the
/// server keeps running.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The client is gone or its outbound channel is closed.
    #[error("client '{0}' is not connected")]
    Disconnected(String),

    /// Payload serialization failed.
    #[error("failed to serialize payload: {0}")]
    Serialize(String),
}

// =============================================================================
// Queue errors
// =============================================================================

/// Errors from the file-backed message queue. A bad record is skipped; a
/// bad poll cycle is skipped entirely.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue file could not be opened, locked, or truncated.
    #[error("queue I/O error: {0}")]
    Io(String),

    /// A record line was not valid JSON of a known record type.
    #[error("malformed queue record: {0}")]
    BadRecord(String),
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Result type aliases
// =============================================================================

/// Result type for setup operations.
pub type SetupResult<T> = Result<T, SetupError>;

/// Result type for protocol decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for per-client delivery.
pub type SendResult<T> = Result<T, SendError>;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
