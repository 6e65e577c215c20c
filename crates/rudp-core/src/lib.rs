//! # rudp-core
//!
//! A reliable transport over plain UDP datagrams: per-peer sequencing,
//! cumulative+listed acknowledgement, fragmentation/reassembly, and a
//! connection lifecycle (SYN/ACK/DAT/NUL/RST) that self-heals when either
//! side's sequence state diverges.
//!
//! ## Crate structure
//!
//! - [`wire`] — packet framing: magic prefix, type/flags, the ack list
//! - [`peer`] — `PeerId`, the address handle everything else keys on
//! - [`config`] — tunables: MTU, tick frequencies, sequence limits
//! - [`sequence`] — per-peer local/remote/packet-id/skipped bookkeeping
//! - [`pool`] — the unconfirmed-packet retention list
//! - [`fragment`] — splitting and reassembling oversized payloads
//! - [`send`] / [`recv`] — the two pipelines the worker loops drive
//! - [`connection`] — [`Engine`], the connection endpoint applications hold
//! - [`socket`] — the `DatagramSocket` seam, plus a real and an in-memory impl
//! - [`events`] — the callback surface applications implement
//! - [`stats`] — aggregate counters, snapshot as JSON
//! - [`error`] — `RudpError` / `DecodeError`

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod fragment;
pub mod peer;
pub mod pool;
pub mod recv;
pub mod send;
pub mod sequence;
pub mod socket;
pub mod stats;
pub mod wire;

pub use config::{Config, Role};
pub use connection::{ConnState, Engine};
pub use error::{DecodeError, RudpError};
pub use events::{EventHandler, NullEventHandler};
pub use peer::PeerId;
pub use socket::{DatagramSocket, MemorySocket, StdUdpSocket};
pub use stats::EngineStatsSnapshot;
pub use wire::{Packet, PacketFlags, PacketType};
