//! Send pipeline (spec §4.4): drain the send queue, assign sequence
//! numbers, piggy-back acknowledgements, stamp resets, and transmit —
//! called once per `send_frequency` tick by the engine's send loop.

use quanta::Instant;

use crate::config::Role;
use crate::connection::EngineInner;
use crate::events::EventHandler;
use crate::socket::DatagramSocket;
use crate::wire::{PacketFlags, PacketType};

pub(crate) fn send_tick<S: DatagramSocket, E: EventHandler>(inner: &EngineInner<S, E>) {
    let batch = {
        let mut queue = inner.state.send_queue.lock().unwrap();
        queue.drain(..).collect::<Vec<_>>()
    };

    for (peer, mut packet) in batch {
        let seq = {
            let mut sequences = inner.state.sequences.lock().unwrap();
            match sequences.get_mut(&peer) {
                Some(seq_state) => seq_state.next_local(&inner.cfg),
                // The sequence record can vanish between enqueue and this
                // tick (peer was reset mid-flight); the packet is stale.
                None => continue,
            }
        };
        packet.seq = seq;
        packet.dst = Some(peer);

        packet.ack = inner
            .state
            .confirmed
            .lock()
            .unwrap()
            .remove(&peer)
            .unwrap_or_default();

        let was_pending_reset = inner.state.pending_reset.lock().unwrap().remove(&peer);
        if was_pending_reset && inner.role == Role::Server {
            packet.flags.insert(PacketFlags::RST);
            inner.state.sequences.lock().unwrap().remove(&peer);
            tracing::warn!(%peer, "sequence-limit reset, RST flagged on outbound");
        }

        inner
            .state
            .unconfirmed
            .lock()
            .unwrap()
            .insert(peer, packet.seq, packet.clone(), Instant::now());

        if packet.packet_type == PacketType::Rst {
            inner.state.sequences.lock().unwrap().remove(&peer);
        }

        let encoded = packet.encode();
        match inner.socket.send_to(peer, &encoded) {
            Ok(()) => inner.state.stats.record_sent(),
            Err(e) => {
                tracing::warn!(error = %e, %peer, "send_to failed, packet remains unconfirmed");
            }
        }
    }
}
