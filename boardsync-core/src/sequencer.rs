//! Inbound event ordering for boardsync.
//!
//! Server events carry a sequence number that totally orders them. The
//! sequencer tracks the last applied sequence and decides, for each arrival,
//! whether it can be applied now, must wait for a hole to fill, or is a
//! duplicate:
//!
//! - `seq <= applied`: duplicate, dropped
//! - `seq == applied + 1`: ready, together with any now-contiguous buffered events
//! - `seq > applied + 1`: buffered; a gap is open
//!
//! A gap that stays open longer than the gap window, or a buffer that grows
//! past its limit, makes the sequencer give up on replay and ask for a full
//! snapshot. While that snapshot is outstanding, events are discarded.

use std::collections::BTreeMap;

use boardsync_types::Sequence;

/// Limits for the inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerLimits {
    /// How long a gap may stay open before a resync, in milliseconds.
    pub gap_window_ms: u64,
    /// Maximum number of out-of-order events held while a gap is open.
    pub max_buffered: usize,
}

impl Default for SequencerLimits {
    fn default() -> Self {
        Self {
            gap_window_ms: 2_000,
            max_buffered: 1_024,
        }
    }
}

/// A hole in the inbound sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// First missing sequence.
    pub from: Sequence,
    /// Last missing sequence before the lowest buffered event.
    pub to: Sequence,
    /// When the gap was first observed (epoch ms).
    pub opened_at_ms: u64,
}

/// Why the sequencer asked for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// A gap stayed open past the gap window.
    GapTimeout,
    /// Too many events buffered behind a gap.
    BufferOverflow,
    /// The connection was re-established.
    Reconnected,
    /// The board rejected an event the sequencer released.
    Diverged,
}

impl std::fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResyncReason::GapTimeout => f.write_str("gap timeout"),
            ResyncReason::BufferOverflow => f.write_str("gap buffer overflow"),
            ResyncReason::Reconnected => f.write_str("reconnected"),
            ResyncReason::Diverged => f.write_str("state diverged"),
        }
    }
}

/// What to do with an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest<T> {
    /// Apply these events now, in this order.
    Ready(Vec<(Sequence, T)>),
    /// Held until the gap closes.
    Buffered(Gap),
    /// Already applied or already buffered.
    Duplicate,
    /// Discarded because a snapshot is outstanding.
    AwaitingSnapshot,
    /// Replay is abandoned; request a snapshot. Buffered events were dropped.
    ResyncRequired(ResyncReason),
}

/// Orders inbound events by sequence.
#[derive(Debug, Clone)]
pub struct InboundSequencer<T> {
    limits: SequencerLimits,
    applied: Sequence,
    buffered: BTreeMap<Sequence, T>,
    gap_opened_at_ms: Option<u64>,
    awaiting_snapshot: bool,
}

impl<T> InboundSequencer<T> {
    /// Create a sequencer with nothing applied.
    pub fn new(limits: SequencerLimits) -> Self {
        Self::with_applied(limits, Sequence::zero())
    }

    /// Create a sequencer resuming after `applied`.
    pub fn with_applied(limits: SequencerLimits, applied: Sequence) -> Self {
        Self {
            limits,
            applied,
            buffered: BTreeMap::new(),
            gap_opened_at_ms: None,
            awaiting_snapshot: false,
        }
    }

    /// Offer an inbound event.
    pub fn ingest(&mut self, sequence: Sequence, event: T, now_ms: u64) -> Ingest<T> {
        if self.awaiting_snapshot {
            return Ingest::AwaitingSnapshot;
        }

        if sequence <= self.applied || self.buffered.contains_key(&sequence) {
            return Ingest::Duplicate;
        }

        if sequence != self.applied.next() {
            return self.buffer(sequence, event, now_ms);
        }

        let mut batch = vec![(sequence, event)];
        self.applied = sequence;
        let mut next = sequence.next();
        while let Some(buffered) = self.buffered.remove(&next) {
            batch.push((next, buffered));
            self.applied = next;
            next = next.next();
        }

        if self.buffered.is_empty() {
            self.gap_opened_at_ms = None;
        }

        Ingest::Ready(batch)
    }

    fn buffer(&mut self, sequence: Sequence, event: T, now_ms: u64) -> Ingest<T> {
        if self.buffered.len() >= self.limits.max_buffered {
            self.begin_resync();
            return Ingest::ResyncRequired(ResyncReason::BufferOverflow);
        }

        let opened_at_ms = *self.gap_opened_at_ms.get_or_insert(now_ms);
        self.buffered.insert(sequence, event);

        match self.gap() {
            Some(gap) => Ingest::Buffered(gap),
            // Unreachable in practice: the insert above guarantees a gap
            None => Ingest::Buffered(Gap {
                from: self.applied.next(),
                to: sequence,
                opened_at_ms,
            }),
        }
    }

    /// Check the gap window. Returns the reason if replay must be abandoned.
    pub fn check_gap(&mut self, now_ms: u64) -> Option<ResyncReason> {
        let opened = self.gap_opened_at_ms?;
        if now_ms.saturating_sub(opened) >= self.limits.gap_window_ms {
            self.begin_resync();
            return Some(ResyncReason::GapTimeout);
        }
        None
    }

    /// Drop buffered events and start waiting for a snapshot.
    pub fn begin_resync(&mut self) {
        self.buffered.clear();
        self.gap_opened_at_ms = None;
        self.awaiting_snapshot = true;
    }

    /// A snapshot was applied at `sequence`: adopt it as the new baseline.
    pub fn snapshot_applied(&mut self, sequence: Sequence) {
        self.applied = sequence;
        self.buffered.clear();
        self.gap_opened_at_ms = None;
        self.awaiting_snapshot = false;
    }

    /// The currently open gap, if any.
    pub fn gap(&self) -> Option<Gap> {
        let opened_at_ms = self.gap_opened_at_ms?;
        let (&lowest, _) = self.buffered.iter().next()?;
        Some(Gap {
            from: self.applied.next(),
            to: Sequence::new(lowest.value().saturating_sub(1)),
            opened_at_ms,
        })
    }

    /// Last sequence handed out as ready.
    pub fn applied(&self) -> Sequence {
        self.applied
    }

    /// Number of events held behind a gap.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Check if a snapshot is outstanding.
    pub fn is_awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    /// Configured limits.
    pub fn limits(&self) -> SequencerLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SequencerLimits {
        SequencerLimits {
            gap_window_ms: 1_000,
            max_buffered: 4,
        }
    }

    fn ready_seqs<T>(outcome: Ingest<T>) -> Vec<u64> {
        match outcome {
            Ingest::Ready(batch) => batch.into_iter().map(|(s, _)| s.value()).collect(),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn in_order_events_are_ready() {
        let mut seq = InboundSequencer::new(limits());
        assert_eq!(ready_seqs(seq.ingest(Sequence::new(1), "a", 0)), vec![1]);
        assert_eq!(ready_seqs(seq.ingest(Sequence::new(2), "b", 0)), vec![2]);
        assert_eq!(seq.applied(), Sequence::new(2));
    }

    #[test]
    fn out_of_order_then_fill() {
        // Applied 4; 5 arrives, then 7, then 6
        let mut seq = InboundSequencer::with_applied(limits(), Sequence::new(4));

        assert_eq!(ready_seqs(seq.ingest(Sequence::new(5), 5, 0)), vec![5]);

        let outcome = seq.ingest(Sequence::new(7), 7, 10);
        assert_eq!(
            outcome,
            Ingest::Buffered(Gap {
                from: Sequence::new(6),
                to: Sequence::new(6),
                opened_at_ms: 10
            })
        );
        assert_eq!(seq.applied(), Sequence::new(5));

        match seq.ingest(Sequence::new(6), 6, 20) {
            Ingest::Ready(batch) => assert_eq!(
                batch,
                vec![(Sequence::new(6), 6), (Sequence::new(7), 7)]
            ),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(seq.applied(), Sequence::new(7));
        assert!(seq.gap().is_none());
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut seq = InboundSequencer::with_applied(limits(), Sequence::new(3));
        assert_eq!(seq.ingest(Sequence::new(3), (), 0), Ingest::Duplicate);
        assert_eq!(seq.ingest(Sequence::new(1), (), 0), Ingest::Duplicate);

        seq.ingest(Sequence::new(6), (), 0);
        assert_eq!(seq.ingest(Sequence::new(6), (), 0), Ingest::Duplicate);
        assert_eq!(seq.buffered_len(), 1);
    }

    #[test]
    fn gap_window_expiry_requires_resync() {
        let mut seq = InboundSequencer::with_applied(limits(), Sequence::new(4));
        seq.ingest(Sequence::new(6), (), 100);

        assert_eq!(seq.check_gap(500), None);
        assert_eq!(seq.check_gap(1_100), Some(ResyncReason::GapTimeout));
        assert!(seq.is_awaiting_snapshot());
        assert_eq!(seq.buffered_len(), 0);
    }

    #[test]
    fn partial_fill_keeps_gap_start() {
        let mut seq = InboundSequencer::with_applied(limits(), Sequence::new(0));
        seq.ingest(Sequence::new(2), (), 0);
        seq.ingest(Sequence::new(4), (), 500);
        seq.ingest(Sequence::new(1), (), 600); // releases 1, 2

        let gap = seq.gap().unwrap();
        assert_eq!(gap.from, Sequence::new(3));
        assert_eq!(gap.to, Sequence::new(3));
        assert_eq!(gap.opened_at_ms, 0);
        assert_eq!(seq.check_gap(1_000), Some(ResyncReason::GapTimeout));
    }

    #[test]
    fn no_gap_no_resync() {
        let mut seq: InboundSequencer<()> = InboundSequencer::new(limits());
        assert_eq!(seq.check_gap(u64::MAX), None);
    }

    #[test]
    fn buffer_overflow_requires_resync() {
        let mut seq = InboundSequencer::new(limits());
        for s in 10..14 {
            assert!(matches!(
                seq.ingest(Sequence::new(s), (), 0),
                Ingest::Buffered(_)
            ));
        }
        assert_eq!(
            seq.ingest(Sequence::new(20), (), 0),
            Ingest::ResyncRequired(ResyncReason::BufferOverflow)
        );
        assert_eq!(seq.buffered_len(), 0);
    }

    #[test]
    fn events_discarded_while_awaiting_snapshot() {
        let mut seq = InboundSequencer::new(limits());
        seq.begin_resync();

        assert_eq!(seq.ingest(Sequence::new(1), (), 0), Ingest::AwaitingSnapshot);
        assert_eq!(seq.applied(), Sequence::zero());
    }

    #[test]
    fn snapshot_sets_new_baseline() {
        let mut seq = InboundSequencer::with_applied(limits(), Sequence::new(4));
        seq.ingest(Sequence::new(7), (), 0);
        seq.begin_resync();
        seq.snapshot_applied(Sequence::new(10));

        assert_eq!(seq.applied(), Sequence::new(10));
        assert!(!seq.is_awaiting_snapshot());
        assert_eq!(seq.ingest(Sequence::new(10), (), 0), Ingest::Duplicate);
        assert_eq!(ready_seqs(seq.ingest(Sequence::new(11), (), 0)), vec![11]);
    }

    #[test]
    fn any_arrival_order_yields_gap_free_application() {
        // Every permutation of 1..=5, with duplicates sprinkled in
        let base = [1u64, 2, 3, 4, 5];
        let mut perms = Vec::new();
        permute(&mut base.to_vec(), 0, &mut perms);

        for perm in perms {
            let mut seq = InboundSequencer::new(SequencerLimits {
                gap_window_ms: u64::MAX,
                max_buffered: 16,
            });
            let mut applied = Vec::new();
            let arrivals = perm.iter().chain(perm.iter().rev());
            for &s in arrivals {
                if let Ingest::Ready(batch) = seq.ingest(Sequence::new(s), s, 0) {
                    applied.extend(batch.into_iter().map(|(_, v)| v));
                }
            }
            assert_eq!(applied, vec![1, 2, 3, 4, 5], "arrival order {perm:?}");
        }
    }

    fn permute(items: &mut Vec<u64>, k: usize, out: &mut Vec<Vec<u64>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permute(items, k + 1, out);
            items.swap(k, i);
        }
    }
}
