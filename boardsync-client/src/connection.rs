//! Connection Manager - drives the connection state machine over a transport.
//!
//! [`ConnectionManager`] interprets the [`ConnectionAction`]s produced by
//! the pure [`ConnectionMachine`] from boardsync-core and does the actual
//! I/O: opening and closing the transport, the Hello handshake, heartbeats
//! and frame splitting. Timers are not owned here; the engine asks for the
//! current deadlines and calls back when they expire.
//!
//! ```text
//! engine --event--> ConnectionManager --on_event--> ConnectionMachine
//!                          |                               |
//!                          +<-------- actions -------------+
//!                          v
//!                      Transport
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use boardsync_core::{ConnectionAction, ConnectionEvent, ConnectionMachine, ConnectionState};
use boardsync_types::{
    ClientId, DecodeError, Envelope, EnvelopeKind, ErrorBody, FrameBuffer, Hello, Sequence,
    PROTOCOL_VERSION,
};
use tokio::sync::watch;
use tokio::time::Instant;
use zeroize::{Zeroize, Zeroizing};

use crate::config::SessionConfig;
use crate::credential::CredentialToken;
use crate::error::ConnectionError;
use crate::transport::{Transport, TransportError};

/// Heartbeat and handshake timing.
#[derive(Debug, Clone, Copy)]
struct Timing {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    handshake_timeout: Duration,
    write_timeout: Duration,
}

/// Why a write did not complete.
enum WriteError {
    Transport(TransportError),
    /// The session is closing; the write was abandoned.
    Shutdown,
}

/// Owns the transport and the connection lifecycle.
pub(crate) struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    machine: ConnectionMachine,
    frames: FrameBuffer,
    client_id: ClientId,
    endpoint: Option<String>,
    token: Option<CredentialToken>,
    last_applied: Sequence,
    timing: Timing,
    max_decode_errors: u32,
    decode_errors: u32,
    reconnect_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    last_inbound: Instant,
    live_since: Option<Instant>,
    sustained: bool,
    transitions: Vec<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager in the Disconnected state.
    pub(crate) fn new(
        transport: Arc<T>,
        config: &SessionConfig,
        client_id: ClientId,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            machine: ConnectionMachine::new(config.backoff_policy()),
            frames: FrameBuffer::new(),
            client_id,
            endpoint: None,
            token: None,
            last_applied: Sequence::zero(),
            timing: Timing {
                heartbeat_interval: config.heartbeat_interval(),
                heartbeat_timeout: config.heartbeat_timeout(),
                handshake_timeout: config.handshake_timeout(),
                write_timeout: config.write_timeout(),
            },
            max_decode_errors: config.codec.max_consecutive_decode_errors,
            decode_errors: 0,
            reconnect_at: None,
            handshake_deadline: None,
            last_inbound: Instant::now(),
            live_since: None,
            sustained: false,
            transitions: Vec::new(),
            shutdown,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub(crate) fn transport(&self) -> Arc<T> {
        Arc::clone(&self.transport)
    }

    /// True while the transport is open (Handshaking or Live).
    pub(crate) fn is_transport_open(&self) -> bool {
        matches!(
            self.machine.state(),
            ConnectionState::Handshaking | ConnectionState::Live
        )
    }

    pub(crate) fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub(crate) fn handshake_deadline(&self) -> Option<Instant> {
        self.handshake_deadline
    }

    /// Sequence reported in the next Hello.
    pub(crate) fn set_last_applied(&mut self, sequence: Sequence) {
        self.last_applied = sequence;
    }

    /// States entered since the last call, in order.
    pub(crate) fn drain_transitions(&mut self) -> Vec<ConnectionState> {
        std::mem::take(&mut self.transitions)
    }

    /// Start connecting. Ignored unless Disconnected.
    pub(crate) async fn connect(&mut self, endpoint: String, token: CredentialToken) {
        if self.machine.state() != ConnectionState::Disconnected {
            tracing::debug!(state = %self.machine.state(), "Connect ignored");
            return;
        }
        self.endpoint = Some(endpoint);
        self.token = Some(token);
        self.dispatch(ConnectionEvent::ConnectRequested).await;
    }

    /// Tear down for good.
    pub(crate) async fn close(&mut self) {
        self.dispatch(ConnectionEvent::CloseRequested).await;
    }

    /// Feed a chunk read from the transport.
    ///
    /// Returns the frames the pipeline must see, in arrival order. Handshake
    /// and heartbeat traffic is consumed here.
    pub(crate) async fn on_bytes(&mut self, chunk: &[u8]) -> Vec<Envelope> {
        self.frames.extend(chunk);
        let mut forwarded = Vec::new();

        while let Some(frame) = self.frames.next_frame() {
            let envelope = match frame {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.decode_failed(e).await;
                    continue;
                }
            };
            self.decode_errors = 0;
            self.last_inbound = Instant::now();

            match self.machine.state() {
                ConnectionState::Handshaking => self.on_handshake_frame(&envelope).await,
                ConnectionState::Live => match envelope.kind() {
                    EnvelopeKind::Heartbeat => {}
                    EnvelopeKind::Hello => {
                        self.lose(ConnectionError::ProtocolViolation(
                            "server sent Hello".into(),
                        ))
                        .await;
                    }
                    _ => forwarded.push(envelope),
                },
                _ => {}
            }
        }
        forwarded
    }

    /// Count an undecodable frame or body. Too many in a row drop the
    /// connection.
    pub(crate) async fn decode_failed(&mut self, error: DecodeError) {
        self.decode_errors += 1;
        tracing::warn!(
            consecutive = self.decode_errors,
            "Dropped undecodable frame: {}",
            error
        );
        if self.decode_errors >= self.max_decode_errors {
            self.lose(ConnectionError::Decode(error)).await;
        }
    }

    /// The transport reported an error while reading.
    pub(crate) async fn on_transport_error(&mut self, error: TransportError) {
        self.lose(ConnectionError::Transport(error)).await;
    }

    pub(crate) async fn on_reconnect_timer(&mut self) {
        self.reconnect_at = None;
        self.dispatch(ConnectionEvent::ReconnectTimer).await;
    }

    pub(crate) async fn on_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        let error = ConnectionError::Transport(TransportError::Timeout);
        tracing::warn!(
            "Handshake timeout ({}ms)",
            self.timing.handshake_timeout.as_millis()
        );
        self.dispatch(ConnectionEvent::HandshakeFailed {
            error: error.to_string(),
        })
        .await;
    }

    /// Heartbeat interval tick: liveness check, sustained-Live check, probe.
    pub(crate) async fn on_heartbeat_tick(&mut self) {
        if !self.machine.state().is_live() {
            return;
        }

        let now = Instant::now();
        if now.duration_since(self.last_inbound) >= self.timing.heartbeat_timeout {
            self.lose(ConnectionError::HeartbeatTimeout).await;
            return;
        }

        if !self.sustained {
            if let Some(since) = self.live_since {
                if now.duration_since(since) >= self.timing.heartbeat_interval {
                    self.sustained = true;
                    self.dispatch(ConnectionEvent::LiveSustained).await;
                }
            }
        }

        if let Ok(frame) = Envelope::heartbeat().to_frame() {
            // A failed probe has already dropped the connection
            self.send_frame(&frame).await.ok();
        }
    }

    /// Send an encoded frame. Fails with `NotConnected` unless Live.
    ///
    /// A transport failure or a write stuck past the write timeout drops the
    /// connection before returning. A close requested mid-write abandons the
    /// write and closes.
    pub(crate) async fn send_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        if !self.machine.state().is_live() {
            return Err(ConnectionError::NotConnected);
        }
        match self.write(frame).await {
            Ok(()) => Ok(()),
            Err(WriteError::Transport(e)) => {
                self.lose(ConnectionError::Transport(e.clone())).await;
                Err(ConnectionError::Transport(e))
            }
            Err(WriteError::Shutdown) => {
                self.dispatch(ConnectionEvent::CloseRequested).await;
                Err(ConnectionError::NotConnected)
            }
        }
    }

    /// One transport write, bounded by the write timeout and abandoned on
    /// shutdown.
    async fn write(&self, frame: &[u8]) -> Result<(), WriteError> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = tokio::time::timeout(self.timing.write_timeout, self.transport.send(frame)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(WriteError::Transport(e)),
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = self.timing.write_timeout.as_millis() as u64,
                            "Write timed out"
                        );
                        Err(WriteError::Transport(TransportError::Timeout))
                    }
                }
            }
            _ = shutdown.wait_for(|closed| *closed) => Err(WriteError::Shutdown),
        }
    }

    async fn on_handshake_frame(&mut self, envelope: &Envelope) {
        match envelope.kind() {
            EnvelopeKind::Ack => {
                tracing::debug!("Handshake acknowledged");
                self.dispatch(ConnectionEvent::HandshakeCompleted).await;
            }
            EnvelopeKind::Error => {
                let reason = envelope
                    .body::<ErrorBody>()
                    .map(|b| b.reason)
                    .unwrap_or_else(|_| "unspecified".to_string());
                let error = ConnectionError::HandshakeRejected(reason);
                tracing::warn!("{}", error);
                self.dispatch(ConnectionEvent::HandshakeFailed {
                    error: error.to_string(),
                })
                .await;
            }
            EnvelopeKind::Heartbeat => {}
            other => {
                let error = ConnectionError::ProtocolViolation(format!(
                    "unexpected {:?} during handshake",
                    other
                ));
                tracing::warn!("{}", error);
                self.dispatch(ConnectionEvent::HandshakeFailed {
                    error: error.to_string(),
                })
                .await;
            }
        }
    }

    async fn lose(&mut self, error: ConnectionError) {
        if !self.is_transport_open() {
            return;
        }
        tracing::warn!(state = %self.machine.state(), "Connection lost: {}", error);
        self.dispatch(ConnectionEvent::ConnectionLost {
            reason: error.to_string(),
        })
        .await;
    }

    /// Run an event through the machine, executing actions until quiescent.
    async fn dispatch(&mut self, event: ConnectionEvent) {
        let mut events = VecDeque::from([event]);

        while let Some(event) = events.pop_front() {
            let before = self.machine.state();
            let actions = self.machine.on_event(event);
            let after = self.machine.state();
            if after != before {
                tracing::info!(from = %before, to = %after, "Connection state changed");
                self.transitions.push(after);
            }

            for action in actions {
                if let Some(next) = self.execute(action).await {
                    events.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, action: ConnectionAction) -> Option<ConnectionEvent> {
        match action {
            ConnectionAction::Connect => self.open().await,
            ConnectionAction::StartHandshake => self.start_handshake().await,
            ConnectionAction::EnterLive => {
                let now = Instant::now();
                self.handshake_deadline = None;
                self.live_since = Some(now);
                self.last_inbound = now;
                self.sustained = false;
                None
            }
            ConnectionAction::CloseTransport => {
                // Best effort; the peer may already be gone
                tokio::time::timeout(self.timing.write_timeout, self.transport.close())
                    .await
                    .ok();
                self.frames.clear();
                self.decode_errors = 0;
                self.handshake_deadline = None;
                self.live_since = None;
                None
            }
            ConnectionAction::StartReconnectTimer { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            ConnectionAction::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
        }
    }

    async fn open(&mut self) -> Option<ConnectionEvent> {
        let endpoint = self.endpoint.clone()?;
        let mut shutdown = self.shutdown.clone();

        // close() must not wait for a slow connect
        let result = tokio::select! {
            result = self.transport.connect(&endpoint) => result,
            _ = shutdown.wait_for(|closed| *closed) => {
                return Some(ConnectionEvent::CloseRequested);
            }
        };

        match result {
            Ok(()) => {
                tracing::debug!(endpoint = %endpoint, "Transport connected");
                Some(ConnectionEvent::ConnectSucceeded)
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, "Connect failed: {}", e);
                Some(ConnectionEvent::ConnectFailed {
                    error: e.to_string(),
                })
            }
        }
    }

    async fn start_handshake(&mut self) -> Option<ConnectionEvent> {
        self.frames.clear();
        self.decode_errors = 0;
        self.last_inbound = Instant::now();
        self.handshake_deadline = Some(Instant::now() + self.timing.handshake_timeout);

        let mut hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            client_id: self.client_id,
            token: self
                .token
                .as_ref()
                .map(|t| t.expose().to_string())
                .unwrap_or_default(),
            last_applied: self.last_applied,
        };

        // Every copy of the token is wiped once encoded
        let envelope = Envelope::with_body(EnvelopeKind::Hello, Sequence::zero(), None, &hello);
        hello.token.zeroize();
        let frame = envelope.and_then(|envelope| {
            let frame = envelope.to_frame();
            envelope.into_payload().zeroize();
            frame
        });
        let frame = match frame {
            Ok(frame) => Zeroizing::new(frame),
            Err(e) => {
                return Some(ConnectionEvent::HandshakeFailed {
                    error: e.to_string(),
                })
            }
        };

        match self.write(&frame).await {
            Ok(()) => {
                tracing::debug!(last_applied = %self.last_applied, "Hello sent");
                None
            }
            Err(WriteError::Transport(e)) => Some(ConnectionEvent::HandshakeFailed {
                error: ConnectionError::Transport(e).to_string(),
            }),
            Err(WriteError::Shutdown) => Some(ConnectionEvent::CloseRequested),
        }
    }
}
