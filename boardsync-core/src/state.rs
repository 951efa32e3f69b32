//! Connection state machine for boardsync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the connection lifecycle. The machine takes events as input and produces
//! a list of actions to execute; the engine in boardsync-client performs the
//! actual I/O.
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Live
//!                     ^                          |
//!                     +----- Reconnecting <------+
//!
//! any state --close--> Closed (terminal)
//! ```

use std::fmt;
use std::time::Duration;

use crate::backoff::{Backoff, BackoffPolicy};

/// Connection lifecycle state, as published to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Disconnected,
    /// Transport connection attempt in progress.
    Connecting,
    /// Transport up, Hello sent, waiting for the server Ack.
    Handshaking,
    /// Handshake complete; actions and events flow.
    Live,
    /// Connection lost, waiting for the backoff timer.
    Reconnecting {
        /// Consecutive reconnect attempts since backoff was last reset.
        attempt: u32,
    },
    /// Closed by the user. Terminal.
    Closed,
}

impl ConnectionState {
    /// Check if the session is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Reconnecting { .. }
        )
    }

    /// Check if the state is terminal.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Live => f.write_str("live"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// User asked to connect.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Server acknowledged the Hello.
    HandshakeCompleted,
    /// Handshake failed (timeout, server Error, unexpected frame).
    HandshakeFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// A live connection was lost (socket error, heartbeat timeout,
    /// protocol violation, repeated decode errors).
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// The connection has been Live for at least one heartbeat interval.
    LiveSustained,
    /// Reconnect timer fired.
    ReconnectTimer,
    /// User asked to close the session.
    CloseRequested,
}

/// Actions to be executed by the engine.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the transport.
    Connect,
    /// Send the Hello and start the handshake timer.
    StartHandshake,
    /// Connection reached Live: resync and flush the outbound queue.
    EnterLive,
    /// Close the transport (best effort).
    CloseTransport,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Attempt this timer leads to.
        attempt: u32,
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
}

/// The connection state machine: current state plus backoff counter.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: Backoff,
}

impl ConnectionMachine {
    /// Create a machine in the Disconnected state.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(policy),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnect attempts since the last sustained Live period.
    pub fn backoff_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Process an event and return the actions to execute.
    ///
    /// Events that make no sense in the current state are ignored.
    pub fn on_event(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        use ConnectionState as S;

        match (self.state, event) {
            // Closed is terminal
            (S::Closed, _) => vec![],

            (_, ConnectionEvent::CloseRequested) => {
                self.state = S::Closed;
                vec![ConnectionAction::CancelReconnect, ConnectionAction::CloseTransport]
            }

            // From Disconnected
            (S::Disconnected, ConnectionEvent::ConnectRequested) => {
                self.state = S::Connecting;
                vec![ConnectionAction::Connect]
            }

            // From Connecting
            (S::Connecting, ConnectionEvent::ConnectSucceeded) => {
                self.state = S::Handshaking;
                vec![ConnectionAction::StartHandshake]
            }
            (S::Connecting, ConnectionEvent::ConnectFailed { .. }) => self.schedule_reconnect(false),

            // From Handshaking
            (S::Handshaking, ConnectionEvent::HandshakeCompleted) => {
                self.state = S::Live;
                vec![ConnectionAction::EnterLive]
            }
            (S::Handshaking, ConnectionEvent::HandshakeFailed { .. })
            | (S::Handshaking, ConnectionEvent::ConnectionLost { .. }) => self.schedule_reconnect(true),

            // From Live
            (S::Live, ConnectionEvent::LiveSustained) => {
                self.backoff.reset();
                vec![]
            }
            (S::Live, ConnectionEvent::ConnectionLost { .. }) => self.schedule_reconnect(true),

            // From Reconnecting
            (S::Reconnecting { .. }, ConnectionEvent::ReconnectTimer) => {
                self.state = S::Connecting;
                vec![ConnectionAction::Connect]
            }

            // Invalid transitions - stay in current state
            _ => vec![],
        }
    }

    fn schedule_reconnect(&mut self, close_transport: bool) -> Vec<ConnectionAction> {
        let (attempt, delay) = self.backoff.next_delay();
        self.state = ConnectionState::Reconnecting { attempt };

        let mut actions = Vec::with_capacity(2);
        if close_transport {
            actions.push(ConnectionAction::CloseTransport);
        }
        actions.push(ConnectionAction::StartReconnectTimer { attempt, delay });
        actions
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
