//! Envelope - the unit exchanged over the transport.

use crate::codec;
use crate::messages::Body;
use crate::{CorrelationId, DecodeError, EncodeError, Sequence};

/// Envelope kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Server: an ordered mutation of the board. Client: a submitted action.
    Event = 1,
    /// Server acknowledgement (of the handshake, or of an action by correlation id)
    Ack = 2,
    /// Liveness probe, sent by both sides
    Heartbeat = 3,
    /// Server: full board state. Client: request for one (empty payload).
    Snapshot = 4,
    /// Server-reported failure, per action when a correlation id is present
    Error = 5,
    /// Client handshake carrying the credential token
    Hello = 6,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(EnvelopeKind::Event),
            2 => Ok(EnvelopeKind::Ack),
            3 => Ok(EnvelopeKind::Heartbeat),
            4 => Ok(EnvelopeKind::Snapshot),
            5 => Ok(EnvelopeKind::Error),
            6 => Ok(EnvelopeKind::Hello),
            _ => Err(DecodeError::UnsupportedKind(value)),
        }
    }
}

/// One discrete protocol message.
///
/// Fields are read-only once constructed; build a new envelope to change
/// anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sequence: Sequence,
    kind: EnvelopeKind,
    correlation_id: Option<CorrelationId>,
    timestamp: u64,
    payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope stamped with the current wall-clock time.
    pub fn new(
        kind: EnvelopeKind,
        sequence: Sequence,
        correlation_id: Option<CorrelationId>,
        payload: Vec<u8>,
    ) -> Self {
        Self::with_timestamp(kind, sequence, correlation_id, now_millis(), payload)
    }

    /// Create an envelope with an explicit timestamp (epoch milliseconds).
    pub fn with_timestamp(
        kind: EnvelopeKind,
        sequence: Sequence,
        correlation_id: Option<CorrelationId>,
        timestamp: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            kind,
            correlation_id,
            timestamp,
            payload,
        }
    }

    /// Create an envelope whose payload is a typed body.
    pub fn with_body<B: Body>(
        kind: EnvelopeKind,
        sequence: Sequence,
        correlation_id: Option<CorrelationId>,
        body: &B,
    ) -> Result<Self, EncodeError> {
        Ok(Self::new(kind, sequence, correlation_id, body.to_bytes()?))
    }

    /// A heartbeat probe with an empty payload.
    pub fn heartbeat() -> Self {
        Self::new(EnvelopeKind::Heartbeat, Sequence::zero(), None, Vec::new())
    }

    /// A client request for a full snapshot.
    pub fn snapshot_request() -> Self {
        Self::new(EnvelopeKind::Snapshot, Sequence::zero(), None, Vec::new())
    }

    /// Sequence number (server-assigned inbound, client-assigned outbound).
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Envelope kind.
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Correlation id, if this envelope refers to a client action.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Sender timestamp in epoch milliseconds. Informational only.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload, consuming the envelope.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decode the payload as a typed body.
    pub fn body<B: Body>(&self) -> Result<B, DecodeError> {
        B::from_bytes(&self.payload)
    }

    /// Encode to a length-prefixed wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode(self)
    }

    /// Decode from a complete length-prefixed wire frame.
    pub fn from_frame(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes)
    }
}

/// Current wall-clock time in epoch milliseconds (0 if the clock is before 1970).
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorBody;

    #[test]
    fn kind_discriminants_roundtrip() {
        for val in 1..=6u8 {
            let kind = EnvelopeKind::try_from(val).unwrap();
            assert_eq!(kind as u8, val);
        }
    }

    #[test]
    fn invalid_kind_fails() {
        assert_eq!(
            EnvelopeKind::try_from(0),
            Err(DecodeError::UnsupportedKind(0))
        );
        assert!(EnvelopeKind::try_from(7).is_err());
        assert!(EnvelopeKind::try_from(255).is_err());
    }

    #[test]
    fn new_sets_recent_timestamp() {
        let envelope = Envelope::heartbeat();
        let now = now_millis();
        assert!(envelope.timestamp() <= now);
        assert!(envelope.timestamp() >= now - 60_000);
    }

    #[test]
    fn typed_body_roundtrip() {
        let envelope = Envelope::with_body(
            EnvelopeKind::Error,
            Sequence::zero(),
            Some(CorrelationId::new(3)),
            &ErrorBody {
                reason: "entity locked".into(),
            },
        )
        .unwrap();

        let body: ErrorBody = envelope.body().unwrap();
        assert_eq!(body.reason, "entity locked");
        assert_eq!(envelope.correlation_id(), Some(CorrelationId::new(3)));
    }

    #[test]
    fn into_payload_returns_body_bytes() {
        let envelope = Envelope::new(
            EnvelopeKind::Event,
            Sequence::new(2),
            None,
            vec![1, 2, 3],
        );
        assert_eq!(envelope.into_payload(), vec![1, 2, 3]);
    }

    #[test]
    fn snapshot_request_is_empty() {
        let envelope = Envelope::snapshot_request();
        assert_eq!(envelope.kind(), EnvelopeKind::Snapshot);
        assert!(envelope.payload().is_empty());
        assert_eq!(envelope.correlation_id(), None);
    }
}
