//! # boardsync-core
//!
//! Pure logic for boardsync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for session
//! synchronization without any network or clock access, enabling fast unit
//! tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in as epoch milliseconds; the only
//! outside input is the OS random source used for backoff jitter.
//!
//! The actual I/O (transport, timers) is performed by `boardsync-client`,
//! which interprets the actions and effects produced here.
//!
//! - [`state`] - connection lifecycle ([`ConnectionMachine`])
//! - [`backoff`] - exponential reconnect backoff with jitter
//! - [`outbound`] - pending local actions ([`OutboundQueue`])
//! - [`sequencer`] - inbound ordering and gap detection ([`InboundSequencer`])
//! - [`reconciler`] - authoritative board state ([`SessionState`])
//! - [`pipeline`] - all of the above wired together ([`SyncPipeline`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod outbound;
pub mod pipeline;
pub mod reconciler;
pub mod sequencer;
pub mod state;

pub use backoff::{Backoff, BackoffPolicy};
pub use outbound::{BufferError, Generation, OutboundQueue, PendingAction};
pub use pipeline::{Effect, PipelineConfig, ResyncPolicy, SyncPipeline};
pub use reconciler::{overlay, ActionOutcome, ActionResult, ReconcileError, SessionState};
pub use sequencer::{Gap, InboundSequencer, Ingest, ResyncReason, SequencerLimits};
pub use state::{ConnectionAction, ConnectionEvent, ConnectionMachine, ConnectionState};
