//! The session engine task.
//!
//! One task per [`Session`](crate::Session) owns the transport (through the
//! [`ConnectionManager`]) and the [`SyncPipeline`]. Everything else talks to
//! it through channels: commands in, snapshots and updates out. The engine
//! is the only writer of session state.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use boardsync_core::{ConnectionState, Effect, SyncPipeline};
use boardsync_types::{
    Action, ClientId, CorrelationId, Envelope, EnvelopeKind, ErrorBody, Mutation, SnapshotBody,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::connection::ConnectionManager;
use crate::credential::CredentialToken;
use crate::session::{ConnectionStatus, SessionSnapshot, StateUpdate};
use crate::transport::{Transport, TransportError};

/// Requests from the facade.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        endpoint: String,
        token: CredentialToken,
    },
    Submit {
        correlation_id: CorrelationId,
        action: Action,
    },
    SubscribeState(mpsc::UnboundedSender<StateUpdate>),
    SubscribeConnection(mpsc::UnboundedSender<ConnectionStatus>),
    Close,
}

/// Correlation ids held by unresolved actions.
///
/// The facade claims an id before submitting; the engine releases it when
/// the action resolves. Shared so a duplicate is refused synchronously.
#[derive(Debug, Clone, Default)]
pub(crate) struct Claims(Arc<Mutex<HashSet<CorrelationId>>>);

impl Claims {
    /// Returns false if the id is already held.
    pub(crate) fn claim(&self, correlation_id: CorrelationId) -> bool {
        self.lock().insert(correlation_id)
    }

    pub(crate) fn release(&self, correlation_id: CorrelationId) {
        self.lock().remove(&correlation_id);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<CorrelationId>> {
        // The set stays consistent even if a holder panicked
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the engine shares with the facade.
pub(crate) struct Outputs {
    pub(crate) snapshot: watch::Sender<Arc<SessionSnapshot>>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) claims: Claims,
}

pub(crate) struct Engine<T: Transport> {
    manager: ConnectionManager<T>,
    pipeline: SyncPipeline,
    outputs: Outputs,
    claims: Claims,
    status: ConnectionStatus,
    state_subscribers: Vec<mpsc::UnboundedSender<StateUpdate>>,
    connection_subscribers: Vec<mpsc::UnboundedSender<ConnectionStatus>>,
    heartbeat_interval: Duration,
    gap_check_interval: Duration,
    started: Instant,
}

impl<T: Transport> Engine<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        config: &SessionConfig,
        client_id: ClientId,
        shutdown: watch::Receiver<bool>,
        outputs: Outputs,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(transport, config, client_id, shutdown),
            pipeline: SyncPipeline::new(config.pipeline_config()),
            claims: outputs.claims.clone(),
            outputs,
            status: ConnectionStatus::default(),
            state_subscribers: Vec::new(),
            connection_subscribers: Vec::new(),
            heartbeat_interval: config.heartbeat_interval(),
            gap_check_interval: config.gap_check_interval(),
            started: Instant::now(),
        }
    }

    /// Run until a Close command arrives or the facade is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut heartbeat = time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut gap_check = time::interval_at(
            Instant::now() + self.gap_check_interval,
            self.gap_check_interval,
        );
        gap_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Session engine started");

        loop {
            let transport = self.manager.transport();
            let open = self.manager.is_transport_open();
            let reconnect_at = self.manager.reconnect_at();
            let handshake_deadline = self.manager.handshake_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                _ = sleep_until(reconnect_at) => self.manager.on_reconnect_timer().await,
                _ = sleep_until(handshake_deadline) => self.manager.on_handshake_timeout().await,
                chunk = transport.recv(), if open => self.on_chunk(chunk).await,
                _ = heartbeat.tick() => self.manager.on_heartbeat_tick().await,
                _ = gap_check.tick() => {
                    let effects = self.pipeline.tick(self.now_ms());
                    self.run_effects(effects).await;
                }
            }

            self.settle().await;
        }

        self.shutdown().await;
        tracing::debug!("Session engine stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint, token } => {
                tracing::info!(endpoint = %endpoint, "Connecting");
                self.manager.connect(endpoint, token).await;
            }
            Command::Submit {
                correlation_id,
                action,
            } => {
                tracing::debug!(
                    correlation_id = correlation_id.value(),
                    action = action.name(),
                    "Action submitted"
                );
                match self.pipeline.submit(correlation_id, action) {
                    Ok(effects) => self.run_effects(effects).await,
                    // The facade claims ids up front, so this is a caller bypassing it
                    Err(e) => tracing::warn!(
                        correlation_id = correlation_id.value(),
                        "Action dropped: {}",
                        e
                    ),
                }
            }
            Command::SubscribeState(tx) => {
                let current = self.outputs.snapshot.borrow().clone();
                if tx.send(StateUpdate::Resynced(current)).is_ok() {
                    self.state_subscribers.push(tx);
                }
            }
            Command::SubscribeConnection(tx) => {
                if tx.send(self.status).is_ok() {
                    self.connection_subscribers.push(tx);
                }
            }
            // Handled by the run loop
            Command::Close => {}
        }
    }

    async fn on_chunk(&mut self, chunk: Result<Vec<u8>, TransportError>) {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                self.manager.on_transport_error(e).await;
                return;
            }
        };

        for envelope in self.manager.on_bytes(&chunk).await {
            // An earlier frame may have dropped the connection
            if !self.manager.state().is_live() {
                break;
            }
            self.on_envelope(envelope).await;
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        let effects = match envelope.kind() {
            EnvelopeKind::Event => match envelope.body::<Mutation>() {
                Ok(mutation) => {
                    self.pipeline
                        .apply_event(envelope.sequence(), mutation, self.now_ms())
                }
                Err(e) => {
                    self.manager.decode_failed(e).await;
                    return;
                }
            },
            EnvelopeKind::Snapshot => match envelope.body::<SnapshotBody>() {
                Ok(body) => {
                    tracing::info!(
                        sequence = envelope.sequence().value(),
                        entities = body.entities.len(),
                        "Snapshot received"
                    );
                    self.pipeline.apply_snapshot(envelope.sequence(), body.entities)
                }
                Err(e) => {
                    self.manager.decode_failed(e).await;
                    return;
                }
            },
            EnvelopeKind::Ack => match envelope.correlation_id() {
                Some(correlation_id) => {
                    let effects = self.pipeline.apply_ack(correlation_id);
                    if effects.is_empty() {
                        tracing::debug!(
                            correlation_id = correlation_id.value(),
                            "Ack for unknown action"
                        );
                    }
                    effects
                }
                None => vec![],
            },
            EnvelopeKind::Error => {
                let reason = envelope
                    .body::<ErrorBody>()
                    .map(|b| b.reason)
                    .unwrap_or_else(|_| "unspecified".to_string());
                match envelope.correlation_id() {
                    Some(correlation_id) => {
                        tracing::info!(
                            correlation_id = correlation_id.value(),
                            "Action rejected: {}",
                            reason
                        );
                        self.pipeline.apply_error(correlation_id, &reason)
                    }
                    None => {
                        tracing::warn!("Server error: {}", reason);
                        vec![]
                    }
                }
            }
            // Consumed by the connection manager
            EnvelopeKind::Heartbeat | EnvelopeKind::Hello => vec![],
        };

        self.run_effects(effects).await;
    }

    /// Carry out pipeline effects in order, then publish the new snapshot.
    async fn run_effects(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        let mut changed = false;

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Send(pending) => {
                    let frame = Envelope::with_body(
                        EnvelopeKind::Event,
                        pending.sequence,
                        Some(pending.correlation_id),
                        &pending.action,
                    )
                    .and_then(|envelope| envelope.to_frame());

                    match frame {
                        Ok(frame) => match self.manager.send_frame(&frame).await {
                            Ok(()) => tracing::debug!(
                                correlation_id = pending.correlation_id.value(),
                                sequence = pending.sequence.value(),
                                "Action sent"
                            ),
                            // Stays in flight; replayed on the next Live
                            Err(e) => tracing::debug!(
                                correlation_id = pending.correlation_id.value(),
                                "Action not sent: {}",
                                e
                            ),
                        },
                        Err(e) => {
                            tracing::warn!(
                                correlation_id = pending.correlation_id.value(),
                                "Failed to encode action: {}",
                                e
                            );
                            queue.extend(
                                self.pipeline
                                    .apply_error(pending.correlation_id, &e.to_string()),
                            );
                        }
                    }
                }
                Effect::RequestSnapshot { reason } => {
                    tracing::info!(%reason, "Requesting snapshot");
                    if let Ok(frame) = Envelope::snapshot_request().to_frame() {
                        if let Err(e) = self.manager.send_frame(&frame).await {
                            tracing::debug!("Snapshot request not sent: {}", e);
                        }
                    }
                }
                Effect::Applied { sequence, mutation } => {
                    changed = true;
                    self.manager.set_last_applied(sequence);
                    self.broadcast(StateUpdate::Applied { sequence, mutation });
                }
                Effect::Resynced { sequence } => {
                    self.manager.set_last_applied(sequence);
                    let snapshot = self.publish_snapshot();
                    changed = false;
                    self.broadcast(StateUpdate::Resynced(snapshot));
                }
                Effect::Resolved(outcome) => {
                    changed = true;
                    self.claims.release(outcome.correlation_id);
                    self.broadcast(StateUpdate::Resolved(outcome));
                }
                Effect::PendingChanged => {
                    changed = true;
                    self.broadcast(StateUpdate::PendingChanged(self.pipeline.pending()));
                }
            }
        }

        if changed {
            self.publish_snapshot();
        }
    }

    /// Apply connection transitions to the pipeline and publish them.
    async fn settle(&mut self) {
        loop {
            let transitions = self.manager.drain_transitions();
            if transitions.is_empty() {
                break;
            }

            for state in transitions {
                if state.is_live() {
                    let effects = self.pipeline.go_live();
                    self.publish_status(state);
                    self.run_effects(effects).await;
                } else {
                    if self.status.state.is_live() {
                        self.pipeline.go_offline();
                    }
                    self.publish_status(state);
                }
            }
        }

        // Syncing flag may flip without a transition
        let state = self.manager.state();
        if self.current_status(state) != self.status {
            self.publish_status(state);
        }
    }

    async fn shutdown(&mut self) {
        self.manager.close().await;
        let effects = self.pipeline.close();
        self.run_effects(effects).await;
        self.settle().await;

        self.state_subscribers.clear();
        self.connection_subscribers.clear();
    }

    fn current_status(&self, state: ConnectionState) -> ConnectionStatus {
        ConnectionStatus {
            state,
            syncing: state.is_live() && self.pipeline.is_syncing(),
        }
    }

    fn publish_status(&mut self, state: ConnectionState) {
        let status = self.current_status(state);
        self.status = status;
        self.outputs.status.send_replace(status);
        self.connection_subscribers
            .retain(|tx| tx.send(status).is_ok());
    }

    fn publish_snapshot(&mut self) -> Arc<SessionSnapshot> {
        let snapshot = Arc::new(SessionSnapshot::new(
            self.pipeline.state().clone(),
            self.pipeline.pending(),
            self.pipeline.is_syncing(),
        ));
        self.outputs.snapshot.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    fn broadcast(&mut self, update: StateUpdate) {
        self.state_subscribers
            .retain(|tx| tx.send(update.clone()).is_ok());
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
