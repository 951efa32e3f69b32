//! Typed envelope bodies.
//!
//! Bodies are MessagePack-encoded into an [`Envelope`](crate::Envelope)
//! payload. Which body a payload holds follows from the envelope kind and
//! direction:
//!
//! | kind      | client -> server | server -> client |
//! |-----------|------------------|------------------|
//! | Hello     | [`Hello`]        | -                |
//! | Event     | [`Action`]       | [`Mutation`]     |
//! | Snapshot  | empty (request)  | [`SnapshotBody`] |
//! | Error     | -                | [`ErrorBody`]    |
//! | Ack       | -                | empty            |
//! | Heartbeat | empty            | empty            |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ClientId, DecodeError, EncodeError, EntityId, Sequence};

/// Current handshake protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// A payload type that can be carried in an envelope.
pub trait Body: Serialize + DeserializeOwned {
    /// Serialize to MessagePack bytes.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        rmp_serde::to_vec(self).map_err(EncodeError::Body)
    }

    /// Deserialize from MessagePack bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        rmp_serde::from_slice(bytes).map_err(DecodeError::body)
    }
}

/// Kinds of drawable entity on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Freehand polyline
    Line,
    /// Axis-aligned rectangle
    Rectangle,
    /// Ellipse
    Ellipse,
    /// Rich text box
    Text,
    /// Straight segment
    Segment,
}

/// One entity on the board.
///
/// `descriptor` is the presentation layer's serialized shape; the engine
/// never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable entity id
    pub id: EntityId,
    /// What kind of shape this is
    pub kind: EntityKind,
    /// Opaque shape description
    pub descriptor: String,
    /// Descriptor before the last modification (used by server-side undo)
    pub previous_descriptor: Option<String>,
    /// Last modification time, epoch milliseconds
    pub timestamp: u64,
}

impl Entity {
    /// Create an entity with no modification history.
    pub fn new(id: EntityId, kind: EntityKind, descriptor: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id,
            kind,
            descriptor: descriptor.into(),
            previous_descriptor: None,
            timestamp,
        }
    }
}

/// A local mutation submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Add new entities
    Add(Vec<Entity>),
    /// Delete entities by id
    Delete(Vec<EntityId>),
    /// Replace existing entities
    Modify(Vec<Entity>),
    /// Ask the server to undo the last board change
    Undo,
    /// Ask the server to redo the last undone change
    Redo,
}

impl Action {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Add(_) => "add",
            Action::Delete(_) => "delete",
            Action::Modify(_) => "modify",
            Action::Undo => "undo",
            Action::Redo => "redo",
        }
    }
}

/// An ordered change to the authoritative board, as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Entities were added (or replaced, if the id already exists)
    Add(Vec<Entity>),
    /// Entities were removed
    Delete(Vec<EntityId>),
    /// Existing entities were changed
    Modify(Vec<Entity>),
}

/// Client handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version (currently 1)
    pub protocol_version: u8,
    /// This session's client id
    pub client_id: ClientId,
    /// Opaque credential token, passed through unmodified
    pub token: String,
    /// Highest sequence this client has applied
    pub last_applied: Sequence,
}

impl std::fmt::Debug for Hello {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hello")
            .field("protocol_version", &self.protocol_version)
            .field("client_id", &self.client_id)
            .field("token", &"[REDACTED]")
            .field("last_applied", &self.last_applied)
            .finish()
    }
}

/// Full board state sent by the server. The envelope sequence is the
/// snapshot's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    /// Every entity on the board
    pub entities: Vec<Entity>,
}

/// Server-reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason
    pub reason: String,
}

impl Body for Hello {}
impl Body for Action {}
impl Body for Mutation {}
impl Body for SnapshotBody {}
impl Body for ErrorBody {}
