//! # boardsync-client
//!
//! Session synchronization engine for a collaborative whiteboard.
//!
//! This is the library a whiteboard UI links against. It keeps one live
//! session with a board server over a byte-stream transport and publishes
//! the synchronized board as immutable snapshots.
//!
//! ## Features
//!
//! - **Resilient connection**: handshake, heartbeats, reconnect with
//!   exponential backoff and jitter
//! - **Ordered application**: gaps are buffered, then resolved by replay or
//!   a full snapshot
//! - **Optimistic actions**: pending actions overlay the board until the
//!   server confirms or rejects them
//! - **Transport abstraction**: pluggable transport layer (TCP, mock)
//! - **Pure state machines**: protocol logic lives in boardsync-core
//!
//! ## Example
//!
//! ```ignore
//! use boardsync_client::{CredentialToken, Session, SessionConfig, TcpTransport};
//!
//! let config = SessionConfig::from_file(Path::new("boardsync.toml"))?;
//! let session = Session::start(config, TcpTransport::new())?;
//! session.connect("127.0.0.1:9000", CredentialToken::new(token))?;
//!
//! let mut status = session.observe_connection();
//! while let Some(s) = status.next().await {
//!     println!("{}", s.state);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod connection;
pub mod credential;
mod engine;
pub mod error;
pub mod session;
pub mod transport;

pub use boardsync_core::{ActionOutcome, ActionResult, ConnectionState, PendingAction, ResyncPolicy};
pub use config::{
    CodecConfig, ConfigError, HeartbeatConfig, ReconnectConfig, SequencerConfig, SessionConfig,
};
pub use credential::CredentialToken;
pub use error::{ConnectionError, SessionError};
pub use session::{
    ConnectionObserver, ConnectionStatus, Session, SessionSnapshot, StateSubscription, StateUpdate,
};
pub use transport::{
    Fault, MockTransport, TcpTransport, TcpTransportConfig, Transport, TransportError,
};
