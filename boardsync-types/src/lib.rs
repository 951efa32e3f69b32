//! # boardsync-types
//!
//! Wire format types for the boardsync session protocol.
//!
//! This crate provides the foundational types used across all boardsync crates:
//! - [`ClientId`], [`CorrelationId`], [`Sequence`], [`EntityId`] - Identity and ordering types
//! - [`Envelope`] - The unit exchanged over the transport
//! - [`codec`] - Length-prefixed framing ([`encode`], [`decode`], [`FrameBuffer`])
//! - [`Action`], [`Mutation`], [`Hello`], [`SnapshotBody`] - Typed envelope bodies
//! - [`DecodeError`], [`EncodeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod envelope;
mod error;
mod ids;
mod messages;

pub use codec::{decode, encode, FrameBuffer, LENGTH_PREFIX_LEN, MAX_FRAME_SIZE};
pub use envelope::{now_millis, Envelope, EnvelopeKind};
pub use error::{DecodeError, EncodeError};
pub use ids::{ClientId, CorrelationId, EntityId, Sequence};
pub use messages::{
    Action, Body, Entity, EntityKind, ErrorBody, Hello, Mutation, SnapshotBody, PROTOCOL_VERSION,
};
