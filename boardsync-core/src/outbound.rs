//! Outbound action queue for boardsync.
//!
//! This module holds every action the user has submitted until the server
//! resolves it:
//! - FIFO ordering by client sequence for delivery
//! - In-flight tracking (sent but not yet acknowledged), tagged with the
//!   connection generation the send happened on
//! - Max size limits to prevent unbounded memory growth
//!
//! Actions flow through the queue in this order:
//! 1. `enqueue()` - assign a client sequence and add to the queue
//! 2. `dequeue()` - remove from queue, move to in-flight
//! 3. `resolve()` - remove entirely (Ack or Error received)
//!
//! After a reconnect, `requeue_stale()` moves in-flight actions sent on an
//! earlier connection back into the queue so they are replayed in their
//! original order. Nothing leaves the queue except through `resolve()`,
//! `take_stale()`, or `clear()`, and each of those hands the removed actions
//! back to the caller.

use std::collections::{BTreeMap, VecDeque};

use boardsync_types::{Action, CorrelationId, Sequence};
use thiserror::Error;

/// Error type for outbound queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Queue is at capacity.
    #[error("outbound queue full (capacity: {capacity})")]
    Full {
        /// Current queue capacity.
        capacity: usize,
    },

    /// The correlation id is already in use by an unresolved action.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),
}

/// Connection generation: incremented every time the session reaches Live.
pub type Generation = u64;

/// A local action waiting for the server's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Client-chosen id tying the action to its Ack or Error.
    pub correlation_id: CorrelationId,
    /// Client sequence assigned at submission.
    pub sequence: Sequence,
    /// The action itself.
    pub action: Action,
    /// Generation of the most recent send, if it has been sent.
    pub sent_generation: Option<Generation>,
}

impl PendingAction {
    /// Create a pending action that has not been sent.
    pub fn new(correlation_id: CorrelationId, sequence: Sequence, action: Action) -> Self {
        Self {
            correlation_id,
            sequence,
            action,
            sent_generation: None,
        }
    }

    /// Check if the action has been sent at least once.
    pub fn was_sent(&self) -> bool {
        self.sent_generation.is_some()
    }
}

/// Outbound queue with in-flight tracking.
#[derive(Debug)]
pub struct OutboundQueue {
    /// Maximum number of actions (queued + in-flight).
    max_size: usize,
    /// Last client sequence handed out.
    last_sequence: Sequence,
    /// Actions waiting to be sent, in client sequence order.
    queue: VecDeque<PendingAction>,
    /// Actions sent but not yet resolved, keyed by client sequence.
    in_flight: BTreeMap<Sequence, PendingAction>,
}

impl OutboundQueue {
    /// Create a new queue with the given maximum size.
    ///
    /// The max size includes both queued and in-flight actions.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            last_sequence: Sequence::zero(),
            queue: VecDeque::new(),
            in_flight: BTreeMap::new(),
        }
    }

    /// Add an action to the queue, assigning the next client sequence.
    ///
    /// Fails if the queue is full or the correlation id is already pending.
    pub fn enqueue(
        &mut self,
        correlation_id: CorrelationId,
        action: Action,
    ) -> Result<Sequence, BufferError> {
        if self.total_count() >= self.max_size {
            return Err(BufferError::Full {
                capacity: self.max_size,
            });
        }
        if self.contains(correlation_id) {
            return Err(BufferError::DuplicateCorrelation(correlation_id));
        }

        self.last_sequence = self.last_sequence.next();
        self.queue
            .push_back(PendingAction::new(correlation_id, self.last_sequence, action));
        Ok(self.last_sequence)
    }

    /// Remove and return the next action to send.
    ///
    /// The action is moved to the in-flight set, tagged with `generation`.
    pub fn dequeue(&mut self, generation: Generation) -> Option<PendingAction> {
        let mut action = self.queue.pop_front()?;
        action.sent_generation = Some(generation);
        self.in_flight.insert(action.sequence, action.clone());
        Some(action)
    }

    /// Remove an action because the server resolved it (Ack or Error).
    ///
    /// Returns `None` for unknown correlation ids.
    pub fn resolve(&mut self, correlation_id: CorrelationId) -> Option<PendingAction> {
        let in_flight = self
            .in_flight
            .iter()
            .find(|(_, a)| a.correlation_id == correlation_id)
            .map(|(seq, _)| *seq);
        if let Some(seq) = in_flight {
            return self.in_flight.remove(&seq);
        }

        let queued = self
            .queue
            .iter()
            .position(|a| a.correlation_id == correlation_id)?;
        self.queue.remove(queued)
    }

    /// Move in-flight actions last sent before `generation` back into the
    /// queue, preserving client sequence order.
    ///
    /// Returns how many actions were re-queued.
    pub fn requeue_stale(&mut self, generation: Generation) -> usize {
        let stale = self.split_stale(generation);
        let count = stale.len();
        if count > 0 {
            self.queue.extend(stale);
            self.queue.make_contiguous().sort_by_key(|a| a.sequence);
        }
        count
    }

    /// Remove and return in-flight actions last sent before `generation`,
    /// in client sequence order.
    pub fn take_stale(&mut self, generation: Generation) -> Vec<PendingAction> {
        self.split_stale(generation)
    }

    fn split_stale(&mut self, generation: Generation) -> Vec<PendingAction> {
        let stale: Vec<Sequence> = self
            .in_flight
            .values()
            .filter(|a| a.sent_generation.is_some_and(|g| g < generation))
            .map(|a| a.sequence)
            .collect();
        stale
            .into_iter()
            .filter_map(|seq| self.in_flight.remove(&seq))
            .collect()
    }

    /// Check if an action with this correlation id is unresolved.
    pub fn contains(&self, correlation_id: CorrelationId) -> bool {
        self.in_flight
            .values()
            .chain(self.queue.iter())
            .any(|a| a.correlation_id == correlation_id)
    }

    /// Check if an action is in flight (sent but not resolved).
    pub fn is_in_flight(&self, correlation_id: CorrelationId) -> bool {
        self.in_flight
            .values()
            .any(|a| a.correlation_id == correlation_id)
    }

    /// All unresolved actions in client sequence order.
    pub fn pending(&self) -> Vec<PendingAction> {
        let mut all: Vec<PendingAction> = self
            .in_flight
            .values()
            .chain(self.queue.iter())
            .cloned()
            .collect();
        all.sort_by_key(|a| a.sequence);
        all
    }

    /// Number of actions waiting to be sent (not including in-flight).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is waiting to be sent.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of in-flight actions.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Total number of unresolved actions (queued + in-flight).
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Remove every unresolved action and return them in sequence order.
    pub fn clear(&mut self) -> Vec<PendingAction> {
        let mut all: Vec<PendingAction> = std::mem::take(&mut self.in_flight)
            .into_values()
            .chain(self.queue.drain(..))
            .collect();
        all.sort_by_key(|a| a.sequence);
        all
    }
}
