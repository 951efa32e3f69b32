//! The synchronization pipeline, without I/O.
//!
//! [`SyncPipeline`] ties the outbound queue, the inbound sequencer and the
//! board state together. Every method takes one input (a submitted action,
//! a decoded server message, a clock tick, a connection transition) and
//! returns the [`Effect`]s the engine must carry out, in order.
//!
//! Resync rule: every time the connection reaches Live, or a gap forces a
//! snapshot while Live, the generation is bumped, buffered inbound events are
//! dropped and a snapshot is requested. Actions last sent on an older
//! generation are stale: they are re-queued (or invalidated, depending on
//! [`ResyncPolicy`]) and the queue is flushed in submission order. Reaching
//! Live handles stale actions right away; a mid-session resync handles them
//! when the snapshot arrives. Either way an action is replayed at most once
//! per resync.

use boardsync_types::{Action, CorrelationId, Entity, Mutation, Sequence};
use serde::{Deserialize, Serialize};

use crate::outbound::{BufferError, Generation, OutboundQueue, PendingAction};
use crate::reconciler::{ActionOutcome, SessionState};
use crate::sequencer::{InboundSequencer, Ingest, ResyncReason, SequencerLimits};

/// What happens to unacknowledged actions from a previous connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncPolicy {
    /// Send them again; the server deduplicates by correlation id.
    #[default]
    Resubmit,
    /// Resolve them as invalidated.
    Invalidate,
}

/// Pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Inbound gap handling.
    pub sequencer: SequencerLimits,
    /// Maximum queued plus in-flight actions.
    pub max_pending_actions: usize,
    /// Treatment of stale actions on resync.
    pub resync_policy: ResyncPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequencer: SequencerLimits::default(),
            max_pending_actions: 1_024,
            resync_policy: ResyncPolicy::Resubmit,
        }
    }
}

/// Instructions for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Encode and send this action as an Event envelope.
    Send(PendingAction),
    /// Send a snapshot request.
    RequestSnapshot {
        /// Why the request is made.
        reason: ResyncReason,
    },
    /// One event was applied to the board.
    Applied {
        /// Sequence of the applied event.
        sequence: Sequence,
        /// The change that was applied.
        mutation: Mutation,
    },
    /// The board was replaced by a snapshot.
    Resynced {
        /// Sequence of the snapshot.
        sequence: Sequence,
    },
    /// A pending action reached its final state.
    Resolved(ActionOutcome),
    /// The set of pending actions changed.
    PendingChanged,
}

/// Pure synchronization state for one session.
#[derive(Debug)]
pub struct SyncPipeline {
    state: SessionState,
    outbound: OutboundQueue,
    inbound: InboundSequencer<Mutation>,
    policy: ResyncPolicy,
    generation: Generation,
    live: bool,
}

impl SyncPipeline {
    /// Create a pipeline with an empty board.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            state: SessionState::new(),
            outbound: OutboundQueue::new(config.max_pending_actions),
            inbound: InboundSequencer::new(config.sequencer),
            policy: config.resync_policy,
            generation: 0,
            live: false,
        }
    }

    /// Queue a local action, sending it immediately if Live.
    ///
    /// A full queue resolves the action as rejected right away. A correlation
    /// id that is still unresolved is refused without touching the queue, so
    /// the action already holding it keeps its single outcome.
    pub fn submit(
        &mut self,
        correlation_id: CorrelationId,
        action: Action,
    ) -> Result<Vec<Effect>, BufferError> {
        match self.outbound.enqueue(correlation_id, action) {
            Ok(_) => {
                let mut effects = vec![Effect::PendingChanged];
                if self.live {
                    effects.extend(self.flush());
                }
                Ok(effects)
            }
            Err(e @ BufferError::Full { .. }) => Ok(vec![Effect::Resolved(
                ActionOutcome::rejected(correlation_id, e.to_string()),
            )]),
            Err(e) => Err(e),
        }
    }

    /// The connection reached Live.
    pub fn go_live(&mut self) -> Vec<Effect> {
        self.generation += 1;
        self.live = true;
        self.inbound.begin_resync();

        let mut effects = vec![Effect::RequestSnapshot {
            reason: ResyncReason::Reconnected,
        }];
        effects.extend(self.handle_stale());
        effects.extend(self.flush());
        effects
    }

    /// The connection left Live. In-flight actions stay in flight until the
    /// next [`go_live`](Self::go_live) decides their fate.
    pub fn go_offline(&mut self) {
        self.live = false;
    }

    /// A server Event arrived.
    pub fn apply_event(&mut self, sequence: Sequence, mutation: Mutation, now_ms: u64) -> Vec<Effect> {
        match self.inbound.ingest(sequence, mutation, now_ms) {
            Ingest::Ready(batch) => {
                let mut effects = Vec::with_capacity(batch.len());
                for (sequence, mutation) in batch {
                    if self.state.apply_event(sequence, &mutation).is_err() {
                        // Sequencer and board disagree; start over from a snapshot
                        self.inbound.begin_resync();
                        effects.push(self.request_snapshot(ResyncReason::Diverged));
                        break;
                    }
                    effects.push(Effect::Applied { sequence, mutation });
                }
                effects
            }
            Ingest::ResyncRequired(reason) => vec![self.request_snapshot(reason)],
            Ingest::Buffered(_) | Ingest::Duplicate | Ingest::AwaitingSnapshot => vec![],
        }
    }

    /// A server Snapshot arrived: replace the board wholesale.
    pub fn apply_snapshot(&mut self, sequence: Sequence, entities: Vec<Entity>) -> Vec<Effect> {
        self.state = SessionState::from_snapshot(sequence, entities);
        self.inbound.snapshot_applied(sequence);

        let mut effects = vec![Effect::Resynced { sequence }];
        effects.extend(self.handle_stale());
        if self.live {
            effects.extend(self.flush());
        }
        effects
    }

    /// The server acknowledged an action.
    pub fn apply_ack(&mut self, correlation_id: CorrelationId) -> Vec<Effect> {
        match self.outbound.resolve(correlation_id) {
            Some(_) => vec![
                Effect::Resolved(ActionOutcome::confirmed(correlation_id)),
                Effect::PendingChanged,
            ],
            None => vec![],
        }
    }

    /// The server refused an action.
    pub fn apply_error(&mut self, correlation_id: CorrelationId, reason: &str) -> Vec<Effect> {
        match self.outbound.resolve(correlation_id) {
            Some(_) => vec![
                Effect::Resolved(ActionOutcome::rejected(correlation_id, reason)),
                Effect::PendingChanged,
            ],
            None => vec![],
        }
    }

    /// Periodic check of the gap window.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Effect> {
        match self.inbound.check_gap(now_ms) {
            Some(reason) => vec![self.request_snapshot(reason)],
            None => vec![],
        }
    }

    /// Start a resync on the current connection.
    ///
    /// The generation moves on so that whatever was sent against the old
    /// baseline counts as stale once the snapshot lands.
    fn request_snapshot(&mut self, reason: ResyncReason) -> Effect {
        if self.live {
            self.generation += 1;
        }
        Effect::RequestSnapshot { reason }
    }

    /// Session is closing: every unresolved action is invalidated.
    pub fn close(&mut self) -> Vec<Effect> {
        self.live = false;
        let dropped = self.outbound.clear();
        if dropped.is_empty() {
            return vec![];
        }

        let mut effects: Vec<Effect> = dropped
            .into_iter()
            .map(|a| Effect::Resolved(ActionOutcome::invalidated(a.correlation_id, "session closed")))
            .collect();
        effects.push(Effect::PendingChanged);
        effects
    }

    fn flush(&mut self) -> Vec<Effect> {
        std::iter::from_fn(|| self.outbound.dequeue(self.generation))
            .map(Effect::Send)
            .collect()
    }

    fn handle_stale(&mut self) -> Vec<Effect> {
        match self.policy {
            ResyncPolicy::Resubmit => {
                self.outbound.requeue_stale(self.generation);
                vec![]
            }
            ResyncPolicy::Invalidate => {
                let stale = self.outbound.take_stale(self.generation);
                if stale.is_empty() {
                    return vec![];
                }
                let mut effects: Vec<Effect> = stale
                    .into_iter()
                    .map(|a| {
                        Effect::Resolved(ActionOutcome::invalidated(
                            a.correlation_id,
                            "invalidated by resync",
                        ))
                    })
                    .collect();
                effects.push(Effect::PendingChanged);
                effects
            }
        }
    }

    /// Authoritative board state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Unresolved actions in submission order.
    pub fn pending(&self) -> Vec<PendingAction> {
        self.outbound.pending()
    }

    /// Last applied sequence.
    pub fn applied_sequence(&self) -> Sequence {
        self.state.applied_sequence()
    }

    /// Check if a snapshot is outstanding.
    pub fn is_syncing(&self) -> bool {
        self.inbound.is_awaiting_snapshot()
    }

    /// Check if the pipeline considers the connection Live.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Current connection generation (0 before the first Live).
    pub fn generation(&self) -> Generation {
        self.generation
    }
}
