//! The byte pipe under a session.
//!
//! A [`Transport`] moves opaque bytes between the client and one board
//! server. It knows nothing about envelopes: chunks returned by `recv` may
//! split a frame or carry several, and the connection manager reassembles
//! them with [`boardsync_types::FrameBuffer`].
//!
//! The engine drives a transport from a single `select!` loop, which puts
//! two requirements on implementations:
//!
//! - `recv` is polled as one branch among many and dropped whenever another
//!   branch wins, so dropping an unfinished `recv` must not lose bytes.
//! - `send` runs while that `recv` future is still alive, so the two halves
//!   of the connection cannot share a lock held across an await.
//!
//! Bounding slow writes and abandoning them on close is the caller's job.
//!
//! [`TcpTransport`] is the production implementation. [`MockTransport`]
//! scripts a server for tests.

mod mock;
mod tcp;

pub use mock::{Fault, MockTransport};
pub use tcp::{TcpTransport, TcpTransportConfig};

use async_trait::async_trait;
use thiserror::Error;

/// A reconnectable byte stream to a board server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint` (`host:port` for TCP).
    ///
    /// Any previous connection is replaced.
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError>;

    /// Write every byte of `data`, or fail.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Next chunk from the server. Never returns an empty chunk; end of
    /// stream is [`TransportError::ConnectionClosed`].
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    fn is_connected(&self) -> bool;

    /// Drop the connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Why a transport call failed.
///
/// None of these end a session; the connection manager treats each one as
/// a lost connection and schedules a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint could not be reached or resolved.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Called before `connect` or after `close`.
    #[error("not connected")]
    NotConnected,

    /// The server ended the stream.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A connect or write outlived its deadline.
    #[error("timeout")]
    Timeout,
}
