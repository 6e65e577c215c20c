//! Receive pipeline (spec §4.5): drain the recv queue, group by peer,
//! process each group in ascending sequence order, reassemble fragments,
//! dispatch to the event handler, and piggy-back acknowledgements —
//! called once per `recv_frequency` tick by the engine's recv loop.

use std::collections::HashMap;

use crate::config::Role;
use crate::connection::{enqueue_packet, EngineInner};
use crate::events::EventHandler;
use crate::peer::PeerId;
use crate::socket::DatagramSocket;
use crate::wire::{Packet, PacketFlags, PacketType};

use bytes::Bytes;

pub(crate) fn recv_tick<S: DatagramSocket, E: EventHandler>(inner: &EngineInner<S, E>) {
    let batch: Vec<Packet> = {
        let mut queue = inner.state.recv_queue.lock().unwrap();
        let n = inner.cfg.recv_batch_size.min(queue.len());
        queue.drain(..n).collect()
    };
    if batch.is_empty() {
        return;
    }

    let mut groups: HashMap<PeerId, Vec<Packet>> = HashMap::new();
    for packet in batch {
        let peer = packet.src.expect("stamped on receipt by handle_datagram");
        groups.entry(peer).or_default().push(packet);
    }

    for (peer, mut packets) in groups {
        packets.sort_by_key(|p| p.seq);
        process_group(inner, peer, packets);
    }
}

fn process_group<S: DatagramSocket, E: EventHandler>(
    inner: &EngineInner<S, E>,
    peer: PeerId,
    packets: Vec<Packet>,
) {
    let is_new_record = {
        let mut sequences = inner.state.sequences.lock().unwrap();
        sequences.init_sequence(peer, inner.role, &inner.cfg)
    };

    if !is_new_record && inner.state.pending_reset.lock().unwrap().contains(&peer) {
        return;
    }

    let mut is_new_sequence = is_new_record;
    let mut group_had_non_ack_nul = false;
    let mut last_accepted_seq = None;

    let mut iter = packets.into_iter();
    while let Some(packet) = iter.next() {
        let seq = packet.seq;

        let already_skipped = inner
            .state
            .sequences
            .lock()
            .unwrap()
            .get(&peer)
            .is_some_and(|s| s.is_skipped(seq));
        if already_skipped {
            continue;
        }

        let expected = inner.state.sequences.lock().unwrap().get(&peer).map(|s| s.remote);
        let Some(expected) = expected else { return };

        if seq != expected {
            if is_new_sequence {
                request_connection_reset(inner, peer);
            } else {
                let mut queue = inner.state.recv_queue.lock().unwrap();
                queue.push_back(packet);
                queue.extend(iter);
                tracing::debug!(%peer, seq, expected, "out of order, deferring group");
            }
            return;
        }

        if is_new_sequence && inner.role == Role::Server && packet.packet_type != PacketType::Syn {
            tracing::warn!(%peer, "non-SYN first packet from unknown client, ignoring");
            // init_sequence's record was only ever transient scaffolding to
            // evaluate this gate; an unknown peer that never sends SYN gets
            // no lasting sequence record (spec §8 S5).
            inner.state.sequences.lock().unwrap().remove(&peer);
            return;
        }

        {
            let mut sequences = inner.state.sequences.lock().unwrap();
            if let Some(s) = sequences.get_mut(&peer) {
                s.remote += 1;
            }
        }
        last_accepted_seq = Some(seq);

        if packet.packet_type != PacketType::Ack && packet.packet_type != PacketType::Nul {
            group_had_non_ack_nul = true;
        }

        if packet.packet_type == PacketType::Syn && inner.role == Role::Server {
            let is_new_client = inner.state.clients.lock().unwrap().insert(peer);
            if is_new_client {
                inner
                    .state
                    .recv_queue
                    .lock()
                    .unwrap()
                    .retain(|p| p.src != Some(peer));
                inner.events.on_client_connect(peer);
            }
        }

        dispatch(inner, peer, &packet);

        if inner.role == Role::Client
            && packet.packet_type == PacketType::Syn
            && packet.flags.contains(PacketFlags::ACK)
        {
            *inner.conn_state.lock().unwrap() = crate::connection::ConnState::Open;
            inner.events.on_connected(peer);
        }

        if inner.role == Role::Client && packet.flags.contains(PacketFlags::RST) {
            return;
        }

        is_new_sequence = false;
    }

    if group_had_non_ack_nul {
        enqueue_packet(inner, peer, PacketType::Ack, Bytes::new());
    }

    if inner.role == Role::Server {
        if let Some(seq) = last_accepted_seq {
            if seq > inner.cfg.sequence_limit {
                inner.state.pending_reset.lock().unwrap().insert(peer);
                tracing::warn!(%peer, seq, "sequence-limit overflow, marked pending_reset");
            }
        }
    }
}

/// Fragment-aware dispatch: confirms `packet`, buffers it if it's part of
/// a fragment group, and fires `on_packet_received` once — either
/// immediately for a whole packet, or once the fragment group completes.
fn dispatch<S: DatagramSocket, E: EventHandler>(inner: &EngineInner<S, E>, peer: PeerId, packet: &Packet) {
    confirm_packet(inner, peer, packet);

    if packet.qty > 0 && packet.packet_type == PacketType::Dat {
        let complete = inner.state.reassembler.lock().unwrap().insert(
            peer,
            packet.id,
            packet.seq,
            packet.qty,
            packet.data.clone(),
        );
        let Some((data, seqs)) = complete else {
            return;
        };
        if let Some(s) = inner.state.sequences.lock().unwrap().get_mut(&peer) {
            for seq in &seqs {
                s.mark_skipped(*seq);
            }
        }
        let mut synthetic = Packet::new(PacketType::Dat, packet.seq)
            .with_id(packet.id)
            .with_qty(packet.qty)
            .with_data(data);
        synthetic.src = Some(peer);
        synthetic.received_at = packet.received_at;
        synthetic.confirmed = true;
        inner.events.on_packet_received(&synthetic);
    } else {
        let mut delivered = packet.clone();
        delivered.confirmed = true;
        inner.events.on_packet_received(&delivered);
    }
}

/// Records `packet.seq` for piggy-backing on the next outbound to `peer`,
/// and purges from the unconfirmed list every sent `seq` that `packet.ack`
/// confirms (spec §4.6).
fn confirm_packet<S: DatagramSocket, E: EventHandler>(inner: &EngineInner<S, E>, peer: PeerId, packet: &Packet) {
    inner
        .state
        .confirmed
        .lock()
        .unwrap()
        .entry(peer)
        .or_default()
        .push(packet.seq);

    if !packet.ack.is_empty() {
        let confirmed_count = inner.state.unconfirmed.lock().unwrap().confirm_all(peer, &packet.ack);
        if confirmed_count > 0 {
            inner.state.stats.record_confirmed(confirmed_count as u64);
        }
    }
}

/// Server-side (spec §4.7): drop `peer` from the clients map, send RST,
/// and fire `on_client_disconnect`. Also used from the recv pipeline when
/// an out-of-order packet arrives against a brand-new sequence record.
pub(crate) fn request_connection_reset<S: DatagramSocket, E: EventHandler>(inner: &EngineInner<S, E>, peer: PeerId) {
    inner.state.clients.lock().unwrap().remove(&peer);
    inner.state.reassembler.lock().unwrap().drop_peer(peer);
    enqueue_packet(inner, peer, PacketType::Rst, Bytes::new());
    inner.state.stats.record_reset();
    inner.events.on_client_disconnect(peer);
}
