//! User-facing event callbacks — out of scope for serialization but the
//! shape the recv pipeline dispatches into, per spec §6.

use crate::peer::PeerId;
use crate::wire::Packet;

/// Callbacks the engine invokes as connection and packet lifecycle events
/// occur. Implement this to react to the protocol; the default
/// [`NullEventHandler`] does nothing and is useful for engines driven only
/// through their return values (e.g. most tests).
pub trait EventHandler: Send + Sync {
    /// Server side: a new peer's SYN was accepted.
    fn on_client_connect(&self, _peer: PeerId) {}
    /// Server side: a peer was reset or explicitly disconnected.
    fn on_client_disconnect(&self, _peer: PeerId) {}
    /// Client side: the SYN|ACK handshake completed.
    fn on_connected(&self, _peer: PeerId) {}
    /// Either side: a user packet (possibly a reassembled fragment group)
    /// was accepted and confirmed.
    fn on_packet_received(&self, _packet: &Packet) {}
}

/// An [`EventHandler`] that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventHandler;

impl EventHandler for NullEventHandler {}
