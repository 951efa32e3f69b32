//! Identity and ordering types for boardsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one client session to the board server.
///
/// Generated fresh for every session. The server deduplicates replayed
/// actions by `(ClientId, CorrelationId)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Create a new random ClientId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create a ClientId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this ClientId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

/// Client-generated identifier tying a submitted action to its Ack or Error.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Create a CorrelationId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

/// A monotonically increasing sequence number.
///
/// Inbound, it is assigned by the server and totally orders Events within a
/// session generation. Outbound, it is assigned by the client at submission.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(u64);

impl Sequence {
    /// Create a new Sequence with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Sequence.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Sequence representing "nothing applied yet".
    pub fn zero() -> Self {
        Self(0)
    }

    /// Increment the sequence by one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({})", self.0)
    }
}

/// Identifier of a whiteboard entity.
///
/// Opaque to the engine; clients conventionally build it as
/// `<user>/<epoch-ms>-<counter>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create an EntityId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id in the conventional `<user>/<epoch-ms>-<counter>` form.
    pub fn generate(user: &str, epoch_ms: u64, counter: u64) -> Self {
        Self(format!("{user}/{epoch_ms}-{counter}"))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
