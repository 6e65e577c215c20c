//! Per-peer sequence bookkeeping — the local/remote/packet-id/skipped
//! quadruple the send and recv pipelines consult on every packet.
//!
//! Grounded in the teacher's `SequenceGenerator` (`pool.rs`): a small
//! counter type owned by whichever side needs to hand out the next value,
//! generalized here to one counter per peer rather than one per process.

use std::collections::{BTreeSet, HashMap};

use crate::config::{Config, Role};
use crate::peer::PeerId;

/// The sequence state this engine keeps for one peer.
#[derive(Debug, Clone)]
pub struct SequenceState {
    /// Next `seq` this side will assign to an outbound packet to this peer.
    pub local: u32,
    /// Next `seq` expected from this peer.
    pub remote: u32,
    /// Next fragment-group id this side will assign.
    pub packet_id: u32,
    /// Inbound sequence numbers already delivered, so a retransmit of an
    /// already-consumed packet doesn't get redelivered or re-counted.
    pub skipped: BTreeSet<u32>,
}

impl SequenceState {
    fn for_role(role: Role, cfg: &Config) -> Self {
        let local = match role {
            Role::Client => cfg.client_start_sequence,
            Role::Server => cfg.server_start_sequence,
        };
        let remote = match role {
            Role::Client => cfg.server_start_sequence,
            Role::Server => cfg.client_start_sequence,
        };
        SequenceState {
            local,
            remote,
            packet_id: 0,
            skipped: BTreeSet::new(),
        }
    }

    /// Advance `local` by one. Strictly monotonic — `sequence_limit`
    /// doesn't wrap this counter, it's the point at which the *receiver*
    /// forces a reset (spec §4.5's overflow check), discarding the record
    /// this counter lives on.
    pub fn next_local(&mut self, _cfg: &Config) -> u32 {
        let seq = self.local;
        self.local += 1;
        seq
    }

    /// Advance `packet_id` by one, wrapping at `packet_id_limit`.
    pub fn next_packet_id(&mut self, cfg: &Config) -> u32 {
        let id = self.packet_id;
        self.packet_id = (self.packet_id + 1) % cfg.packet_id_limit.max(1);
        id
    }

    /// Has this inbound sequence number already been delivered?
    pub fn is_skipped(&self, seq: u32) -> bool {
        self.skipped.contains(&seq)
    }

    /// Record an inbound sequence number as delivered.
    pub fn mark_skipped(&mut self, seq: u32) {
        self.skipped.insert(seq);
    }

    /// Drop skipped entries at or below `floor`; they can never be
    /// re-examined once `remote` has advanced past them.
    pub fn prune_skipped_below(&mut self, floor: u32) {
        self.skipped = self.skipped.split_off(&floor);
    }
}

/// The sequence state for every peer this engine knows about.
#[derive(Debug, Default)]
pub struct SequenceTable {
    peers: HashMap<PeerId, SequenceState>,
}

impl SequenceTable {
    pub fn new() -> Self {
        SequenceTable {
            peers: HashMap::new(),
        }
    }

    /// Ensure a sequence record exists for `peer`, creating a fresh one with
    /// role-appropriate start sequences if this is the first time we've
    /// seen it. Returns `true` if a new record was created.
    pub fn init_sequence(&mut self, peer: PeerId, role: Role, cfg: &Config) -> bool {
        if self.peers.contains_key(&peer) {
            false
        } else {
            self.peers.insert(peer, SequenceState::for_role(role, cfg));
            true
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&SequenceState> {
        self.peers.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut SequenceState> {
        self.peers.get_mut(peer)
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<SequenceState> {
        self.peers.remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }
}
