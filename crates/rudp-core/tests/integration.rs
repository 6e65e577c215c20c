//! # Integration tests: client/server engines talking over a fake wire
//!
//! No real sockets — two [`MemorySocket`]s stand in for the network and a
//! small test harness ferries datagrams between them, optionally dropping
//! or reordering some, exactly the way the teacher's own integration
//! suite exercised its sender/receiver pair without touching the network.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use rudp_core::config::Config;
use rudp_core::connection::{ConnState, Engine};
use rudp_core::events::EventHandler;
use rudp_core::peer::PeerId;
use rudp_core::socket::{DatagramSocket, MemorySocket};
use rudp_core::wire::{Packet, PacketFlags, PacketType};

#[derive(Default)]
struct RecordingHandler {
    connects: Mutex<Vec<PeerId>>,
    disconnects: Mutex<Vec<PeerId>>,
    connected: Mutex<Vec<PeerId>>,
    received: Mutex<Vec<Vec<u8>>>,
}

impl RecordingHandler {
    fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn on_client_connect(&self, peer: PeerId) {
        self.connects.lock().unwrap().push(peer);
    }
    fn on_client_disconnect(&self, peer: PeerId) {
        self.disconnects.lock().unwrap().push(peer);
    }
    fn on_connected(&self, peer: PeerId) {
        self.connected.lock().unwrap().push(peer);
    }
    fn on_packet_received(&self, packet: &Packet) {
        self.received.lock().unwrap().push(packet.data.to_vec());
    }
}

fn fast_config() -> Config {
    Config {
        send_frequency: Duration::from_millis(2),
        recv_frequency: Duration::from_millis(2),
        reset_delay: Duration::from_millis(20),
        ..Config::default()
    }
}

/// Shuttle every datagram each side has sent since the last call over to
/// the other side, tracking how much of each outbox has already been
/// delivered.
struct Wire {
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    client_delivered: usize,
    server_delivered: usize,
}

impl Wire {
    fn new(client_addr: SocketAddr, server_addr: SocketAddr) -> Self {
        Wire {
            client_addr,
            server_addr,
            client_delivered: 0,
            server_delivered: 0,
        }
    }

    fn pump<CS: DatagramSocket, SS: DatagramSocket, CE: EventHandler, SE: EventHandler>(
        &mut self,
        client: &Engine<CS, CE>,
        client_socket: &MemorySocket,
        server: &Engine<SS, SE>,
        server_socket: &MemorySocket,
    ) {
        let from_client = client_socket.sent();
        for (_, bytes) in from_client.iter().skip(self.client_delivered) {
            server.handle_datagram(self.client_addr, bytes);
        }
        self.client_delivered = from_client.len();

        let from_server = server_socket.sent();
        for (_, bytes) in from_server.iter().skip(self.server_delivered) {
            client.handle_datagram(self.server_addr, bytes);
        }
        self.server_delivered = from_server.len();
    }
}

fn run_until(mut f: impl FnMut() -> bool, max_iters: usize) -> bool {
    for _ in 0..max_iters {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(3));
    }
    false
}

#[test]
fn client_server_handshake_completes() {
    let client_addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4002".parse().unwrap();

    let client_socket = MemorySocket::new();
    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let client_events = Arc::new(RecordingHandler::default());

    let client = Engine::client(fast_config(), client_socket.clone(), client_events.clone());
    let server = Engine::server(fast_config(), server_socket.clone(), server_events.clone());

    server.listen();
    client.connect(server_addr);

    let mut wire = Wire::new(client_addr, server_addr);
    let mut accepted = false;
    run_until(
        || {
            wire.pump(&client, &client_socket, &server, &server_socket);
            if !accepted && !server_events.connects.lock().unwrap().is_empty() {
                let peer = server_events.connects.lock().unwrap()[0];
                server.accept(peer);
                accepted = true;
            }
            client.conn_state() == ConnState::Open
        },
        200,
    );

    assert_eq!(client.conn_state(), ConnState::Open);
    assert_eq!(server_events.connects.lock().unwrap().len(), 1);
    assert_eq!(client_events.connected.lock().unwrap().len(), 1);

    client.disconnect();
    server.disconnect();
}

#[test]
fn tiny_payload_delivered_once() {
    let client_addr: SocketAddr = "127.0.0.1:4011".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4012".parse().unwrap();

    let client_socket = MemorySocket::new();
    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let client_events = Arc::new(RecordingHandler::default());

    let client = Engine::client(fast_config(), client_socket.clone(), client_events.clone());
    let server = Engine::server(fast_config(), server_socket.clone(), server_events.clone());

    server.listen();
    client.connect(server_addr);

    let mut wire = Wire::new(client_addr, server_addr);
    let mut accepted = false;
    let mut sent_payload = false;
    run_until(
        || {
            wire.pump(&client, &client_socket, &server, &server_socket);
            if !accepted && !server_events.connects.lock().unwrap().is_empty() {
                let peer = server_events.connects.lock().unwrap()[0];
                server.accept(peer);
                accepted = true;
            }
            if accepted && !sent_payload && client.conn_state() == ConnState::Open {
                client
                    .send(PeerId::from(server_addr), PacketType::Dat, Bytes::from_static(b"hello"))
                    .unwrap();
                sent_payload = true;
            }
            // The handshake's own SYN is dispatched via `on_packet_received`
            // too (spec §4.5's unconditional dispatch for non-fragment
            // packets), so gate on `sent_payload` or this would exit as
            // soon as the SYN lands instead of waiting for "hello".
            sent_payload && !server_events.received().is_empty()
        },
        300,
    );

    // The handshake's own SYN dispatches an empty payload via the same
    // callback, so look for "hello" specifically rather than assuming it's
    // the only or first entry.
    let received = server_events.received();
    assert_eq!(received.iter().filter(|p| p.as_slice() == b"hello").count(), 1);

    client.disconnect();
    server.disconnect();
}

#[test]
fn fragmented_payload_reassembled_once() {
    let client_addr: SocketAddr = "127.0.0.1:4021".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4022".parse().unwrap();

    let client_socket = MemorySocket::new();
    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let client_events = Arc::new(RecordingHandler::default());

    let cfg = Config {
        mtu: 100,
        max_mtu: 80,
        ..fast_config()
    };
    let client = Engine::client(cfg.clone(), client_socket.clone(), client_events.clone());
    let server = Engine::server(cfg, server_socket.clone(), server_events.clone());

    server.listen();
    client.connect(server_addr);

    let payload = Bytes::from(vec![0xABu8; 200]);
    let mut wire = Wire::new(client_addr, server_addr);
    let mut accepted = false;
    let mut sent_payload = false;
    run_until(
        || {
            wire.pump(&client, &client_socket, &server, &server_socket);
            if !accepted && !server_events.connects.lock().unwrap().is_empty() {
                let peer = server_events.connects.lock().unwrap()[0];
                server.accept(peer);
                accepted = true;
            }
            if accepted && !sent_payload && client.conn_state() == ConnState::Open {
                client
                    .send(PeerId::from(server_addr), PacketType::Dat, payload.clone())
                    .unwrap();
                sent_payload = true;
            }
            // Same reasoning as `tiny_payload_delivered_once`: wait for the
            // actual payload, not just any dispatch (the handshake SYN
            // dispatches one too).
            sent_payload && server_events.received().iter().any(|p| p.len() == 200)
        },
        400,
    );

    let received = server_events.received();
    let fragmented = received.iter().filter(|p| p.len() == 200).count();
    assert_eq!(fragmented, 1, "fragments reassemble into one dispatch");
    let reassembled = received.iter().find(|p| p.len() == 200).unwrap();
    assert!(reassembled.iter().all(|&b| b == 0xAB));

    client.disconnect();
    server.disconnect();
}

#[test]
fn dropped_ack_keeps_packet_unconfirmed() {
    let client_addr: SocketAddr = "127.0.0.1:4031".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4032".parse().unwrap();

    let client_socket = MemorySocket::new();
    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let client_events = Arc::new(RecordingHandler::default());

    let client = Engine::client(fast_config(), client_socket.clone(), client_events.clone());
    let server = Engine::server(fast_config(), server_socket.clone(), server_events.clone());

    server.listen();
    client.connect(server_addr);

    let mut wire = Wire::new(client_addr, server_addr);
    let mut accepted = false;
    let mut sent_payload = false;
    run_until(
        || {
            // Deliver client -> server always, but once the server has
            // seen the client, drop every datagram server -> client
            // (including its SYN|ACK handshake reply) so nothing the
            // client sent ever gets acked back.
            let from_client = client_socket.sent();
            for (_, bytes) in from_client.iter().skip(wire.client_delivered) {
                server.handle_datagram(client_addr, bytes);
            }
            wire.client_delivered = from_client.len();

            if !accepted {
                let from_server = server_socket.sent();
                for (_, bytes) in from_server.iter().skip(wire.server_delivered) {
                    client.handle_datagram(server_addr, bytes);
                }
                wire.server_delivered = from_server.len();
            }

            if !accepted && !server_events.connects.lock().unwrap().is_empty() {
                let peer = server_events.connects.lock().unwrap()[0];
                server.accept(peer);
                accepted = true;
            }
            if accepted && !sent_payload {
                client
                    .send(PeerId::from(server_addr), PacketType::Dat, Bytes::from_static(b"x"))
                    .unwrap();
                sent_payload = true;
            }
            // The handshake's own SYN dispatches an empty payload too, so
            // wait for "x" specifically rather than any non-empty list.
            sent_payload && server_events.received().iter().any(|p| p.as_slice() == b"x")
        },
        300,
    );

    assert_eq!(server_events.received().iter().filter(|p| p.as_slice() == b"x").count(), 1);
    // The client's ACK to the server is being dropped from this point on,
    // so whatever the client sent stays in its unconfirmed list.
    std::thread::sleep(Duration::from_millis(20));
    let snapshot = client.stats();
    assert!(snapshot.unconfirmed_depth >= 1);

    client.disconnect();
    server.disconnect();
}

/// S4: two DAT packets land in the recv queue out of sequence order within
/// one tick; `process_group` sorts and delivers them in ascending order
/// regardless of arrival order.
#[test]
fn out_of_order_packets_within_one_tick_delivered_in_order() {
    let client_addr: SocketAddr = "127.0.0.1:4051".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4052".parse().unwrap();

    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let cfg = fast_config();
    let server = Engine::server(cfg.clone(), server_socket.clone(), server_events.clone());
    server.listen();

    let client_peer = PeerId::from(client_addr);
    let start = cfg.client_start_sequence;

    // Establish the peer with a real SYN first, so the next group isn't
    // treated as "unknown peer" (that's S5's gate, not S4's).
    let syn = Packet::new(PacketType::Syn, start).encode();
    server.handle_datagram(client_addr, &syn);
    run_until(|| !server_events.connects.lock().unwrap().is_empty(), 100);
    server.accept(client_peer);

    // Two DAT packets for seq = start+1 and start+2, delivered with the
    // higher sequence first.
    let second = Packet::new(PacketType::Dat, start + 2)
        .with_data(Bytes::from_static(b"B"))
        .encode();
    let first = Packet::new(PacketType::Dat, start + 1)
        .with_data(Bytes::from_static(b"A"))
        .encode();
    server.handle_datagram(client_addr, &second);
    server.handle_datagram(client_addr, &first);

    run_until(
        || server_events.received().iter().any(|p| p.as_slice() == b"B"),
        200,
    );

    let received = server_events.received();
    let pos_a = received.iter().position(|p| p.as_slice() == b"A");
    let pos_b = received.iter().position(|p| p.as_slice() == b"B");
    assert!(pos_a.is_some() && pos_b.is_some(), "both packets delivered");
    assert!(pos_a.unwrap() < pos_b.unwrap(), "delivered in ascending seq order despite reversed arrival");

    server.disconnect();
}

/// S5: the server's first datagram from an unknown peer, if not a SYN, is
/// silently ignored: no callback fires and the peer is left as if it had
/// never been seen.
#[test]
fn unknown_peer_non_syn_is_silently_ignored() {
    let stranger_addr: SocketAddr = "127.0.0.1:4061".parse().unwrap();

    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let cfg = fast_config();
    let server = Engine::server(cfg.clone(), server_socket.clone(), server_events.clone());
    server.listen();

    let stranger = PeerId::from(stranger_addr);
    let dat = Packet::new(PacketType::Dat, cfg.client_start_sequence)
        .with_data(Bytes::from_static(b"uninvited"))
        .encode();
    server.handle_datagram(stranger_addr, &dat);

    std::thread::sleep(Duration::from_millis(40));
    assert!(server_events.received().is_empty(), "non-SYN first packet must not be dispatched");
    assert!(server_events.connects.lock().unwrap().is_empty(), "no connect event for a stranger");

    // The transient sequence record the non-SYN gate discarded must not
    // linger: a proper SYN from the same peer afterward is accepted as a
    // brand-new sequence, not rejected as out-of-order against a stale one.
    let syn = Packet::new(PacketType::Syn, cfg.client_start_sequence).encode();
    server.handle_datagram(stranger_addr, &syn);
    run_until(|| !server_events.connects.lock().unwrap().is_empty(), 200);
    assert_eq!(server_events.connects.lock().unwrap().clone(), vec![stranger]);

    server.disconnect();
}

/// S6: once a peer's accepted sequence exceeds `sequence_limit`, the server
/// marks it `pending_reset`; the next outbound packet to that peer carries
/// the RST flag and the peer's sequence record is removed, so a fresh SYN
/// afterward is accepted as a brand-new sequence.
#[test]
fn sequence_overflow_forces_rst_and_drops_record() {
    let client_addr: SocketAddr = "127.0.0.1:4071".parse().unwrap();

    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let cfg = Config {
        sequence_limit: 5,
        client_start_sequence: 0,
        server_start_sequence: 50,
        ..fast_config()
    };
    let server = Engine::server(cfg.clone(), server_socket.clone(), server_events.clone());
    server.listen();

    let client_peer = PeerId::from(client_addr);

    let syn = Packet::new(PacketType::Syn, 0).encode();
    server.handle_datagram(client_addr, &syn);
    run_until(|| !server_events.connects.lock().unwrap().is_empty(), 100);
    server.accept(client_peer);

    // Drive the peer's accepted sequence past the limit with a run of DAT
    // packets sharing one recv-tick batch.
    for seq in 1..=6u32 {
        let pkt = Packet::new(PacketType::Dat, seq).with_data(Bytes::from_static(b"z")).encode();
        server.handle_datagram(client_addr, &pkt);
    }

    // Wait for the send loop to flag an outbound RST for this peer.
    let saw_rst = run_until(
        || {
            server_socket
                .sent()
                .iter()
                .filter(|(p, _)| *p == client_peer)
                .any(|(_, bytes)| {
                    Packet::decode(bytes)
                        .map(|p| p.flags.contains(PacketFlags::RST))
                        .unwrap_or(false)
                })
        },
        300,
    );
    assert!(saw_rst, "sequence-limit overflow must RST-flag the next outbound");

    // The sequence record for this peer is gone: a fresh SYN restarting at
    // seq 0 is accepted as a brand-new sequence and dispatched, which could
    // only happen if the old record (expecting seq 7 next) was dropped.
    let fresh_syn = Packet::new(PacketType::Syn, 0).encode();
    server.handle_datagram(client_addr, &fresh_syn);
    run_until(
        || server_events.received().iter().filter(|p| p.is_empty()).count() >= 2,
        300,
    );
    assert!(
        server_events.received().iter().filter(|p| p.is_empty()).count() >= 2,
        "post-reset SYN restarting at seq 0 was accepted, proving the old record was removed"
    );

    server.disconnect();
}

/// Exercises the client-side self-heal path (spec §4.7 / `connection.rs`'s
/// `spawn_reset_recovery`): on RST, the client waits `reset_delay`, drops
/// its stale sequence state, and resends a SYN plus every packet that was
/// still unconfirmed — each one preserving its original fragment `id`/
/// `qty`, so a multi-fragment message interrupted mid-flight by a reset
/// still reassembles into exactly one complete message afterward.
#[test]
fn rst_resync_resends_unconfirmed_fragments_intact() {
    let client_addr: SocketAddr = "127.0.0.1:4081".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:4082".parse().unwrap();

    let client_socket = MemorySocket::new();
    let server_socket = MemorySocket::new();
    let server_events = Arc::new(RecordingHandler::default());
    let client_events = Arc::new(RecordingHandler::default());

    let cfg = Config {
        mtu: 100,
        max_mtu: 80,
        ..fast_config()
    };
    let client = Engine::client(cfg.clone(), client_socket.clone(), client_events.clone());
    let server = Engine::server(cfg.clone(), server_socket.clone(), server_events.clone());

    server.listen();
    client.connect(server_addr);

    let mut wire = Wire::new(client_addr, server_addr);
    let mut accepted = false;
    run_until(
        || {
            wire.pump(&client, &client_socket, &server, &server_socket);
            if !accepted && !server_events.connects.lock().unwrap().is_empty() {
                let peer = server_events.connects.lock().unwrap()[0];
                server.accept(peer);
                accepted = true;
            }
            client.conn_state() == ConnState::Open
        },
        200,
    );
    assert_eq!(client.conn_state(), ConnState::Open);

    let server_peer = PeerId::from(server_addr);
    let client_peer = PeerId::from(client_addr);
    let payload = Bytes::from(vec![0xCDu8; 200]);
    client.send(server_peer, PacketType::Dat, payload).unwrap();

    // Let the client's send loop flush all 3 fragments into its own
    // unconfirmed list, without ever letting any of them reach the server
    // — they're lost on the wire from the server's point of view.
    std::thread::sleep(Duration::from_millis(30));
    assert!(client.stats().unconfirmed_depth >= 3);
    wire.client_delivered = client_socket.sent().len();

    // Server-initiated reset. Only pump server -> client so the (still
    // undelivered) fragments stay out of the picture.
    server.request_connection_reset(client_peer);
    run_until(
        || {
            let from_server = server_socket.sent();
            for (_, bytes) in from_server.iter().skip(wire.server_delivered) {
                client.handle_datagram(server_addr, bytes);
            }
            wire.server_delivered = from_server.len();
            client.conn_state() == ConnState::Opening
        },
        200,
    );

    // Resync delay plus margin for the resend to land in the client's
    // own outbox.
    std::thread::sleep(Duration::from_millis(60));

    // Re-open the wire in both directions: the resynced SYN and the three
    // re-sent fragments (still sharing their original id/qty, per the
    // fragment-identity fix) reach the server and reassemble into one
    // complete message.
    let mut accepted_again = false;
    run_until(
        || {
            wire.pump(&client, &client_socket, &server, &server_socket);
            if !accepted_again {
                if let Some(&p) = server_events.connects.lock().unwrap().last() {
                    server.accept(p);
                    accepted_again = true;
                }
            }
            server_events.received().iter().any(|p| p.len() == 200)
        },
        400,
    );

    let received = server_events.received();
    let reassembled: Vec<_> = received.iter().filter(|p| p.len() == 200).collect();
    assert_eq!(reassembled.len(), 1, "fragment identity preserved across reset, one dispatch");
    assert!(reassembled[0].iter().all(|&b| b == 0xCD));

    client.disconnect();
    server.disconnect();
}
