//! Error types surfaced by the RUDP core.

use std::io;

/// Errors the engine can return from its public operations.
///
/// Decode failures and socket send failures are recoverable per the
/// protocol's error handling design: both are logged and the offending
/// operation is simply skipped by the caller, never propagated as a panic.
#[derive(Debug, thiserror::Error)]
pub enum RudpError {
    /// Datagram lacked the magic prefix, or the body was malformed.
    #[error("failed to decode packet: {0}")]
    Decode(#[from] DecodeError),

    /// `send` was called before the engine reached an established state.
    #[error("engine is not connected")]
    NotConnected,

    /// A configured capacity bound (send queue, unconfirmed list) was hit.
    #[error("pool exhausted: {0}")]
    PoolExhausted(&'static str),

    /// The underlying datagram socket failed to send.
    #[error("socket send failed: {0}")]
    Io(#[from] io::Error),
}

/// Why a raw datagram failed to decode into a [`crate::wire::Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The datagram is shorter than the magic prefix.
    #[error("datagram shorter than magic prefix")]
    Truncated,
    /// The leading bytes don't match the protocol's magic header.
    #[error("magic header mismatch")]
    BadMagic,
    /// The body after the magic header could not be parsed.
    #[error("malformed packet body")]
    MalformedBody,
}
