//! Session Facade - the public API for the presentation layer.
//!
//! A [`Session`] spawns one engine task and talks to it over channels. No
//! call blocks on the network: submitting an action, subscribing, and
//! reading the latest snapshot are all immediate.
//!
//! # Example
//!
//! ```ignore
//! use boardsync_client::{Session, SessionConfig, TcpTransport, CredentialToken};
//! use boardsync_types::Action;
//!
//! let session = Session::start(SessionConfig::default(), TcpTransport::new())?;
//! session.connect("127.0.0.1:9000", CredentialToken::new("token"))?;
//!
//! let mut updates = session.observe_state();
//! let correlation_id = session.submit_action(Action::Undo)?;
//!
//! while let Some(update) = updates.next_update().await {
//!     println!("{:?}", update);
//! }
//!
//! session.close().await;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use boardsync_core::{overlay, ActionOutcome, ConnectionState, PendingAction, SessionState};
use boardsync_types::{Action, ClientId, CorrelationId, Entity, EntityId, Mutation, Sequence};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::credential::CredentialToken;
use crate::engine::{Claims, Command, Engine, Outputs};
use crate::error::SessionError;
use crate::transport::Transport;

/// Immutable view of the session published by the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    state: SessionState,
    pending: Vec<PendingAction>,
    syncing: bool,
}

impl SessionSnapshot {
    pub(crate) fn new(state: SessionState, pending: Vec<PendingAction>, syncing: bool) -> Self {
        Self {
            state,
            pending,
            syncing,
        }
    }

    /// Last applied server sequence.
    pub fn sequence(&self) -> Sequence {
        self.state.applied_sequence()
    }

    /// Authoritative entities, without local overlays.
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        self.state.entities()
    }

    /// Look up one authoritative entity.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.state.get(id)
    }

    /// Unresolved local actions in submission order.
    pub fn pending(&self) -> &[PendingAction] {
        &self.pending
    }

    /// True while a snapshot request is outstanding.
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// The board as it should be drawn: server state with pending actions
    /// applied speculatively on top.
    pub fn board(&self) -> BTreeMap<EntityId, Entity> {
        overlay(&self.state, &self.pending)
    }

    /// Serialize the authoritative board as JSON.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct BoardExport<'a> {
            sequence: Sequence,
            entities: Vec<&'a Entity>,
        }

        serde_json::to_string_pretty(&BoardExport {
            sequence: self.sequence(),
            entities: self.state.entities().values().collect(),
        })
    }
}

/// Incremental change published to state subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// The board was replaced wholesale. Always the first update of a
    /// subscription.
    Resynced(Arc<SessionSnapshot>),
    /// One server event was applied.
    Applied {
        /// Sequence of the event.
        sequence: Sequence,
        /// The change.
        mutation: Mutation,
    },
    /// A submitted action reached its final state.
    Resolved(ActionOutcome),
    /// The pending set changed; carries the new set in submission order.
    PendingChanged(Vec<PendingAction>),
}

/// Connection state plus the transient syncing flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Live but waiting for a snapshot.
    pub syncing: bool,
}

/// Subscription to session state.
#[derive(Debug)]
pub struct StateSubscription {
    latest: watch::Receiver<Arc<SessionSnapshot>>,
    updates: mpsc::UnboundedReceiver<StateUpdate>,
}

impl StateSubscription {
    /// Most recently published snapshot.
    pub fn latest(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.latest.borrow())
    }

    /// Next update, in order. `None` once the session is closed and every
    /// queued update has been read.
    pub async fn next_update(&mut self) -> Option<StateUpdate> {
        self.updates.recv().await
    }

    /// Next update if one is already queued.
    pub fn try_next_update(&mut self) -> Option<StateUpdate> {
        self.updates.try_recv().ok()
    }
}

/// Stream of connection transitions, starting with the current status.
#[derive(Debug)]
pub struct ConnectionObserver {
    updates: mpsc::UnboundedReceiver<ConnectionStatus>,
}

impl ConnectionObserver {
    /// Next transition. `None` once the session is closed.
    pub async fn next(&mut self) -> Option<ConnectionStatus> {
        self.updates.recv().await
    }

    /// Wait for a status matching `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ConnectionStatus>
    where
        F: FnMut(&ConnectionStatus) -> bool,
    {
        while let Some(status) = self.updates.recv().await {
            if predicate(&status) {
                return Some(status);
            }
        }
        None
    }
}

/// A synchronized whiteboard session.
///
/// Must be created inside a tokio runtime. Dropping it without calling
/// [`close`](Self::close) aborts the engine task.
#[derive(Debug)]
pub struct Session {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    snapshot: watch::Receiver<Arc<SessionSnapshot>>,
    status: watch::Receiver<ConnectionStatus>,
    next_correlation: AtomicU64,
    claims: Claims,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Validate the configuration and spawn the engine, idle in
    /// Disconnected.
    pub fn start<T>(config: SessionConfig, transport: T) -> Result<Self, SessionError>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let client_id = ClientId::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(SessionSnapshot::default()));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let claims = Claims::default();

        let engine = Engine::new(
            Arc::new(transport),
            &config,
            client_id,
            shutdown_rx,
            Outputs {
                snapshot: snapshot_tx,
                status: status_tx,
                claims: claims.clone(),
            },
        );
        let task = tokio::spawn(engine.run(command_rx));

        tracing::info!(client_id = %client_id, "Session started");

        Ok(Self {
            client_id,
            commands: command_tx,
            shutdown: shutdown_tx,
            snapshot: snapshot_rx,
            status: status_rx,
            next_correlation: AtomicU64::new(1),
            claims,
            task: Some(task),
        })
    }

    /// Random id sent in every Hello of this session.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Ask the engine to connect. Returns immediately; progress is visible
    /// through [`observe_connection`](Self::observe_connection).
    pub fn connect(
        &self,
        endpoint: impl Into<String>,
        token: CredentialToken,
    ) -> Result<(), SessionError> {
        self.send(Command::Connect {
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Submit a local action under a fresh correlation id.
    ///
    /// Never blocks. The outcome arrives as [`StateUpdate::Resolved`].
    pub fn submit_action(&self, action: Action) -> Result<CorrelationId, SessionError> {
        // Skip ids a caller picked through submit_action_with_id
        let correlation_id = loop {
            let candidate =
                CorrelationId::new(self.next_correlation.fetch_add(1, Ordering::Relaxed));
            if self.claims.claim(candidate) {
                break candidate;
            }
        };
        self.submit_claimed(correlation_id, action)?;
        Ok(correlation_id)
    }

    /// Submit a local action under a caller-chosen correlation id.
    ///
    /// Fails with [`SessionError::DuplicateCorrelation`] while another
    /// unresolved action holds the id; that action is not affected.
    pub fn submit_action_with_id(
        &self,
        correlation_id: CorrelationId,
        action: Action,
    ) -> Result<(), SessionError> {
        if !self.claims.claim(correlation_id) {
            return Err(SessionError::DuplicateCorrelation(correlation_id));
        }
        self.submit_claimed(correlation_id, action)
    }

    fn submit_claimed(&self, correlation_id: CorrelationId, action: Action) -> Result<(), SessionError> {
        let sent = self.send(Command::Submit {
            correlation_id,
            action,
        });
        if sent.is_err() {
            self.claims.release(correlation_id);
        }
        sent
    }

    /// Subscribe to state updates. The first update is a
    /// [`StateUpdate::Resynced`] with the state at subscription time.
    pub fn observe_state(&self) -> StateSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // A closed engine leaves the subscription empty
        self.send(Command::SubscribeState(tx)).ok();
        StateSubscription {
            latest: self.snapshot.clone(),
            updates: rx,
        }
    }

    /// Subscribe to connection transitions, starting with the current one.
    pub fn observe_connection(&self) -> ConnectionObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::SubscribeConnection(tx)).ok();
        ConnectionObserver { updates: rx }
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Most recently published snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Close the session and wait for the engine to stop.
    ///
    /// Cancels any connect or reconnect in progress and invalidates every
    /// unresolved action. Nothing is published after this returns.
    pub async fn close(mut self) {
        self.shutdown.send_replace(true);
        self.send(Command::Close).ok();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Session engine ended abnormally: {}", e);
            }
        }
        tracing::info!(client_id = %self.client_id, "Session closed");
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
