//! Error types for the session engine and facade.

use boardsync_types::{CorrelationId, DecodeError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Why a connection attempt or a live connection ended.
///
/// None of these are fatal: each one sends the connection back through
/// Reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Undecodable frames kept arriving.
    #[error("repeated decode errors (last: {0})")]
    Decode(DecodeError),

    /// The server sent a frame that makes no sense in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server answered the Hello with an Error.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Nothing arrived within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Tried to send while not Live.
    #[error("not connected")]
    NotConnected,
}

/// Errors returned by [`Session`](crate::Session) calls.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// An unresolved action already uses this correlation id.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelation(CorrelationId),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
