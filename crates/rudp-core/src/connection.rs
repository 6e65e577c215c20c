//! The engine: owns every piece of shared state the send and recv
//! pipelines touch, and the two long-lived worker threads that drain
//! them. One [`Engine`] is one connection endpoint — a client pinned to a
//! single remote, or a server fanned out over a clients map.
//!
//! Grounded in the teacher's `Session` (`session.rs`) for the
//! connect/listen/disconnect lifecycle and guarded-region layout, adapted
//! from its multi-link join/leave model to this protocol's simpler
//! client/server handshake.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use quanta::Instant;

use crate::config::{Config, Role};
use crate::error::RudpError;
use crate::events::EventHandler;
use crate::fragment::{split_into_fragments, Reassembler};
use crate::peer::PeerId;
use crate::pool::UnconfirmedList;
use crate::recv::recv_tick;
use crate::send::send_tick;
use crate::sequence::SequenceTable;
use crate::socket::DatagramSocket;
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::wire::{Packet, PacketType};

/// Global connection state. Client walks `Closed -> Opening -> Open`;
/// server walks `Closed -> Listen` and stays there for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    Opening,
    Open,
    Listen,
}

/// The mutual-exclusion regions spec §5 calls for, one per logical
/// resource, grouped behind a single `Arc` so worker threads can each hold
/// a cheap clone of the handle.
pub(crate) struct SharedState {
    pub(crate) send_queue: Mutex<VecDeque<(PeerId, Packet)>>,
    pub(crate) recv_queue: Mutex<VecDeque<Packet>>,
    pub(crate) confirmed: Mutex<HashMap<PeerId, Vec<u32>>>,
    pub(crate) unconfirmed: Mutex<UnconfirmedList>,
    pub(crate) sequences: Mutex<SequenceTable>,
    pub(crate) clients: Mutex<HashSet<PeerId>>,
    pub(crate) pending_reset: Mutex<HashSet<PeerId>>,
    pub(crate) reassembler: Mutex<Reassembler>,
    pub(crate) stats: EngineStats,
}

impl SharedState {
    fn new(cfg: &Config) -> Self {
        SharedState {
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            confirmed: Mutex::new(HashMap::new()),
            unconfirmed: Mutex::new(UnconfirmedList::new(cfg.pool_capacity)),
            sequences: Mutex::new(SequenceTable::new()),
            clients: Mutex::new(HashSet::new()),
            pending_reset: Mutex::new(HashSet::new()),
            reassembler: Mutex::new(Reassembler::new()),
            stats: EngineStats::new(),
        }
    }
}

/// The Arc-bundled pieces the worker loops and recv callback need. Cloning
/// this is cheap — every field is already behind an `Arc`.
pub(crate) struct EngineInner<S, E> {
    pub role: Role,
    pub cfg: Config,
    pub socket: Arc<S>,
    pub events: Arc<E>,
    pub state: Arc<SharedState>,
    pub conn_state: Arc<Mutex<ConnState>>,
    pub remote: Arc<Mutex<Option<PeerId>>>,
}

impl<S, E> Clone for EngineInner<S, E> {
    fn clone(&self) -> Self {
        EngineInner {
            role: self.role,
            cfg: self.cfg.clone(),
            socket: self.socket.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            conn_state: self.conn_state.clone(),
            remote: self.remote.clone(),
        }
    }
}

/// One connection endpoint: the protocol engine described by this crate.
/// Construct with [`Engine::client`] or [`Engine::server`], drive I/O with
/// [`Engine::connect`]/[`Engine::listen`], and tear down with
/// [`Engine::disconnect`].
pub struct Engine<S: DatagramSocket + 'static, E: EventHandler + 'static> {
    inner: EngineInner<S, E>,
    alive: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: DatagramSocket + 'static, E: EventHandler + 'static> Engine<S, E> {
    fn new(role: Role, cfg: Config, socket: Arc<S>, events: Arc<E>) -> Self {
        Engine {
            inner: EngineInner {
                role,
                cfg: cfg.clone(),
                socket,
                events,
                state: Arc::new(SharedState::new(&cfg)),
                conn_state: Arc::new(Mutex::new(ConnState::Closed)),
                remote: Arc::new(Mutex::new(None)),
            },
            alive: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Build a client-role engine pinned to no remote yet; call
    /// [`Engine::connect`] to open the handshake.
    pub fn client(cfg: Config, socket: Arc<S>, events: Arc<E>) -> Self {
        Engine::new(Role::Client, cfg, socket, events)
    }

    /// Build a server-role engine; call [`Engine::listen`] to start
    /// accepting peers.
    pub fn server(cfg: Config, socket: Arc<S>, events: Arc<E>) -> Self {
        Engine::new(Role::Server, cfg, socket, events)
    }

    /// Start the two worker loops. Idempotent: a second call is a no-op.
    fn start_workers(&self) {
        if self.alive.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut workers = self.workers.lock().unwrap();

        let send_inner = self.inner.clone();
        let send_alive = self.alive.clone();
        workers.push(std::thread::spawn(move || {
            let span = tracing::info_span!("send_loop", role = ?send_inner.role);
            let _enter = span.enter();
            let mut next_keep_alive = send_inner
                .cfg
                .keep_alive_interval
                .map(|interval| Instant::now() + interval);
            while send_alive.load(Ordering::Acquire) {
                send_tick(&send_inner);
                if let Some(due) = next_keep_alive {
                    if Instant::now() >= due {
                        broadcast_keep_alive(&send_inner);
                        next_keep_alive = send_inner
                            .cfg
                            .keep_alive_interval
                            .map(|interval| Instant::now() + interval);
                    }
                }
                std::thread::sleep(send_inner.cfg.send_frequency);
            }
        }));

        let recv_inner = self.inner.clone();
        let recv_alive = self.alive.clone();
        workers.push(std::thread::spawn(move || {
            let span = tracing::info_span!("recv_loop", role = ?recv_inner.role);
            let _enter = span.enter();
            while recv_alive.load(Ordering::Acquire) {
                recv_tick(&recv_inner);
                std::thread::sleep(recv_inner.cfg.recv_frequency);
            }
        }));
    }

    /// Client: open a connection to `addr`. Pins the remote, transitions
    /// to `Opening`, and sends the initial SYN.
    pub fn connect(&self, addr: SocketAddr) {
        debug_assert_eq!(self.inner.role, Role::Client);
        let peer = PeerId::from(addr);
        *self.inner.remote.lock().unwrap() = Some(peer);
        *self.inner.conn_state.lock().unwrap() = ConnState::Opening;
        tracing::info!(%peer, "connecting");
        self.start_workers();
        enqueue_packet(&self.inner, peer, PacketType::Syn, Bytes::new());
    }

    /// Server: begin accepting connections. The socket's own recv loop
    /// (see [`crate::socket::StdUdpSocket::spawn_recv_loop`]) must be
    /// wired to call [`Engine::handle_datagram`] for inbound datagrams.
    pub fn listen(&self) {
        debug_assert_eq!(self.inner.role, Role::Server);
        *self.inner.conn_state.lock().unwrap() = ConnState::Listen;
        tracing::info!("listening");
        self.start_workers();
    }

    /// Server-side convenience: reply to a peer's SYN with a SYN carrying
    /// the ACK flag, completing the handshake. The core never emits this
    /// automatically — the application decides whether to accept a peer,
    /// typically from its `on_client_connect` handler.
    pub fn accept(&self, peer: PeerId) {
        debug_assert_eq!(self.inner.role, Role::Server);
        let mut q = self.inner.state.send_queue.lock().unwrap();
        let pkt = Packet::new(PacketType::Syn, 0).with_flags(crate::wire::PacketFlags::ACK);
        q.push_back((peer, pkt));
    }

    /// Enqueue a payload for delivery to `peer`, fragmenting if needed.
    /// Returns `NotConnected` if called on a client engine before
    /// `connect`, or `PoolExhausted` if a configured capacity is hit.
    pub fn send(&self, peer: PeerId, packet_type: PacketType, data: Bytes) -> Result<(), RudpError> {
        if self.inner.role == Role::Client && *self.inner.conn_state.lock().unwrap() == ConnState::Closed {
            return Err(RudpError::NotConnected);
        }
        if self.inner.state.unconfirmed.lock().unwrap().is_full() {
            return Err(RudpError::PoolExhausted("unconfirmed retention list"));
        }
        enqueue_packet(&self.inner, peer, packet_type, data);
        Ok(())
    }

    /// Server: send a keep-alive (`NUL`) to every known client. Called
    /// automatically by the send loop when `cfg.keep_alive_interval` is
    /// set; applications may also call it directly at any time.
    pub fn send_keep_alive(&self) {
        debug_assert_eq!(self.inner.role, Role::Server);
        broadcast_keep_alive(&self.inner);
    }

    /// Server: forcibly reset a peer — removes it from the clients map,
    /// sends RST, and fires `on_client_disconnect`.
    pub fn request_connection_reset(&self, peer: PeerId) {
        crate::recv::request_connection_reset(&self.inner, peer);
    }

    /// Tear down: stop both worker loops. Unconfirmed packets and
    /// sequence state are left in place (a reset, not a reset-and-clear);
    /// callers that want a clean slate should drop the engine.
    pub fn disconnect(&self) {
        self.alive.store(false, Ordering::Release);
        *self.inner.conn_state.lock().unwrap() = ConnState::Closed;
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("disconnected");
    }

    /// Called by the datagram adapter for every inbound raw datagram. See
    /// spec §4.5: magic/decode, src/timestamp stamping, and the
    /// client-side RST short-circuit all happen here, before the packet
    /// ever reaches the recv queue.
    pub fn handle_datagram(&self, src: SocketAddr, bytes: &[u8]) {
        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                self.inner.state.stats.record_decode_error();
                tracing::warn!(error = %e, %src, "dropping undecodable datagram");
                return;
            }
        };

        let peer = match self.inner.role {
            Role::Server => PeerId::from(src),
            Role::Client => match *self.inner.remote.lock().unwrap() {
                Some(p) => p,
                None => PeerId::from(src),
            },
        };

        let mut packet = packet;
        packet.src = Some(peer);
        packet.received_at = Some(Instant::now());
        self.inner.state.stats.record_received();

        if packet.packet_type == PacketType::Rst && self.inner.role == Role::Client {
            tracing::warn!(%peer, "received RST, scheduling resync");
            spawn_reset_recovery(self.inner.clone(), peer);
            return;
        }

        self.inner.state.recv_queue.lock().unwrap().push_back(packet);
    }

    /// A point-in-time snapshot of engine counters, JSON-exportable.
    pub fn stats(&self) -> EngineStatsSnapshot {
        let depth = self.inner.state.unconfirmed.lock().unwrap().len();
        self.inner.state.stats.snapshot(depth)
    }

    pub fn conn_state(&self) -> ConnState {
        *self.inner.conn_state.lock().unwrap()
    }
}

/// Send a keep-alive `NUL` to every client currently in the clients map.
/// A no-op on a server with no established clients yet.
pub(crate) fn broadcast_keep_alive<S, E>(inner: &EngineInner<S, E>) {
    let clients: Vec<PeerId> = inner.state.clients.lock().unwrap().iter().copied().collect();
    for peer in clients {
        enqueue_packet(inner, peer, PacketType::Nul, Bytes::new());
    }
}

/// Fragments `data` per spec §4.4 and pushes each resulting packet onto
/// the send queue, tagged with the message's shared `id`. Sequence
/// numbers are assigned later, when the send loop drains the queue.
pub(crate) fn enqueue_packet<S, E>(
    inner: &EngineInner<S, E>,
    peer: PeerId,
    packet_type: PacketType,
    data: Bytes,
) {
    {
        let mut sequences = inner.state.sequences.lock().unwrap();
        sequences.init_sequence(peer, inner.role, &inner.cfg);
    }

    let id = {
        let mut sequences = inner.state.sequences.lock().unwrap();
        let seq_state = sequences.get_mut(&peer).expect("just initialized");
        seq_state.next_packet_id(&inner.cfg)
    };

    let chunks = if data.len() < inner.cfg.max_mtu {
        vec![data]
    } else {
        split_into_fragments(&data, inner.cfg.max_mtu)
    };
    // A payload of exactly `max_mtu` takes the fragmentation branch but
    // still comes back as one chunk; qty stays 0 either way since a
    // single resulting chunk is never distinguishable from "unfragmented".
    let qty = if chunks.len() <= 1 { 0 } else { chunks.len() as u32 };

    let mut queue = inner.state.send_queue.lock().unwrap();
    for chunk in chunks {
        let packet = Packet::new(packet_type, 0)
            .with_id(id)
            .with_qty(qty)
            .with_data(chunk);
        queue.push_back((peer, packet));
    }
}

/// The client-side self-heal described in spec §4.7: wait `reset_delay`,
/// drop the stale sequence record, and resend a SYN plus every packet
/// that was still unconfirmed at the moment of reset.
fn spawn_reset_recovery<S: DatagramSocket + 'static, E: EventHandler + 'static>(
    inner: EngineInner<S, E>,
    peer: PeerId,
) {
    std::thread::spawn(move || {
        std::thread::sleep(inner.cfg.reset_delay);

        inner.state.sequences.lock().unwrap().remove(&peer);
        inner.state.reassembler.lock().unwrap().drop_peer(peer);
        let stale = inner.state.unconfirmed.lock().unwrap().drop_peer(peer);
        inner.state.stats.record_reset();

        *inner.conn_state.lock().unwrap() = ConnState::Opening;
        enqueue_packet(&inner, peer, PacketType::Syn, Bytes::new());
        // Re-enqueue the stale packets themselves, not their payloads —
        // routing a fragment back through `enqueue_packet` would strip its
        // original `id`/`qty` and resend it as a brand-new, unfragmented
        // message, orphaning the receiver's in-progress reassembly group.
        let mut queue = inner.state.send_queue.lock().unwrap();
        for entry in stale {
            inner.state.stats.record_retransmitted();
            queue.push_back((peer, entry.packet));
        }
        drop(queue);
        tracing::info!(%peer, "resynced after RST");
    });
}
