//! Authoritative board state and how server messages change it.
//!
//! Server state always wins. Local actions never touch [`SessionState`]
//! directly; they are shown as a speculative overlay (see [`overlay`]) until
//! the server confirms them with an ordinary event.

use std::collections::BTreeMap;

use boardsync_types::{Action, CorrelationId, Entity, EntityId, Mutation, Sequence};
use thiserror::Error;

use crate::outbound::PendingAction;

/// Errors from applying server messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// An event was offered that is not the next in sequence.
    #[error("out of order event: expected {expected}, got {got}")]
    OutOfOrder {
        /// The only sequence that may be applied next.
        expected: Sequence,
        /// The sequence that was offered.
        got: Sequence,
    },
}

/// The board as last confirmed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    entities: BTreeMap<EntityId, Entity>,
    applied_sequence: Sequence,
}

impl SessionState {
    /// Empty board, nothing applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Board built from a full snapshot.
    pub fn from_snapshot(sequence: Sequence, entities: Vec<Entity>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
            applied_sequence: sequence,
        }
    }

    /// Sequence of the last applied event or snapshot.
    pub fn applied_sequence(&self) -> Sequence {
        self.applied_sequence
    }

    /// All entities, ordered by id.
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    /// Look up one entity.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Number of entities on the board.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the board is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Apply the next event in sequence.
    ///
    /// The sequence must be exactly `applied_sequence + 1`; anything else is
    /// rejected without touching the state.
    pub fn apply_event(
        &mut self,
        sequence: Sequence,
        mutation: &Mutation,
    ) -> Result<(), ReconcileError> {
        let expected = self.applied_sequence.next();
        if sequence != expected {
            return Err(ReconcileError::OutOfOrder {
                expected,
                got: sequence,
            });
        }

        apply_mutation(&mut self.entities, mutation);
        self.applied_sequence = sequence;
        Ok(())
    }
}

fn apply_mutation(entities: &mut BTreeMap<EntityId, Entity>, mutation: &Mutation) {
    match mutation {
        Mutation::Add(added) => {
            for entity in added {
                entities.insert(entity.id.clone(), entity.clone());
            }
        }
        Mutation::Delete(ids) => {
            for id in ids {
                entities.remove(id);
            }
        }
        Mutation::Modify(modified) => modify_existing(entities, modified),
    }
}

// A modify racing a delete loses: absent ids stay absent
fn modify_existing(entities: &mut BTreeMap<EntityId, Entity>, modified: &[Entity]) {
    for entity in modified {
        if let Some(slot) = entities.get_mut(&entity.id) {
            *slot = entity.clone();
        }
    }
}

/// The board as the user should see it: server state with unresolved local
/// actions laid over it in submission order.
///
/// Undo and redo have no local effect; the server answers them with events.
pub fn overlay(state: &SessionState, pending: &[PendingAction]) -> BTreeMap<EntityId, Entity> {
    let mut entities = state.entities.clone();
    for pending in pending {
        match &pending.action {
            Action::Add(added) => apply_mutation(&mut entities, &Mutation::Add(added.clone())),
            Action::Delete(ids) => apply_mutation(&mut entities, &Mutation::Delete(ids.clone())),
            Action::Modify(modified) => modify_existing(&mut entities, modified),
            Action::Undo | Action::Redo => {}
        }
    }
    entities
}

/// How a pending action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// The server acknowledged the action.
    Confirmed,
    /// The server refused the action.
    Rejected(String),
    /// The action was dropped by a resync or by closing the session.
    Invalidated(String),
}

/// Final verdict for one submitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Id returned when the action was submitted.
    pub correlation_id: CorrelationId,
    /// What happened to it.
    pub result: ActionResult,
}

impl ActionOutcome {
    /// Confirmed by the server.
    pub fn confirmed(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            result: ActionResult::Confirmed,
        }
    }

    /// Rejected by the server or locally.
    pub fn rejected(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            result: ActionResult::Rejected(reason.into()),
        }
    }

    /// Invalidated without a server verdict.
    pub fn invalidated(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            result: ActionResult::Invalidated(reason.into()),
        }
    }
}
