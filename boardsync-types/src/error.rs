//! Error types for the boardsync wire format.

use thiserror::Error;

/// Errors produced when decoding bytes from the wire.
///
/// Decoding never panics; every malformed input maps to one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ends before the frame it announces.
    #[error("truncated frame: needed {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required to finish the current field or frame.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// The bytes are structurally invalid.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The kind discriminator is not one this client understands.
    #[error("unsupported envelope kind: {0}")]
    UnsupportedKind(u8),
}

impl DecodeError {
    pub(crate) fn body(err: rmp_serde::decode::Error) -> Self {
        DecodeError::Malformed(format!("body: {err}"))
    }
}

/// Errors produced when building an envelope body.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// MessagePack serialization of the body failed.
    #[error("body serialization failed: {0}")]
    Body(#[source] rmp_serde::encode::Error),

    /// The encoded frame would exceed the maximum frame size.
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge {
        /// Size the frame body would have.
        size: usize,
        /// Maximum allowed frame body size.
        max: usize,
    },
}
