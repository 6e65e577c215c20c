//! # Unconfirmed Packet Retention
//!
//! Every `DAT`/`SYN`/`RST` packet the send pipeline hands to the socket is
//! kept here until the peer's ack-list confirms it. Grounded in the
//! teacher's slab-based `PacketPool` (`pool.rs`): O(1) insert/remove with a
//! pre-sized slab rather than a `Vec` the retransmit path would have to
//! scan linearly.
//!
//! Entries are looked up by `(peer, seq)` rather than bare `seq` — two
//! different peers independently number their outbound packets starting
//! from the same role constant, so a plain `seq` index would conflate
//! unrelated packets from different peers that happen to share a sequence
//! number.

use std::collections::HashMap;

use quanta::Instant;
use slab::Slab;

use crate::peer::PeerId;
use crate::wire::Packet;

/// A packet awaiting confirmation, plus when it was sent.
#[derive(Debug, Clone)]
pub struct UnconfirmedEntry {
    pub peer: PeerId,
    pub seq: u32,
    pub packet: Packet,
    pub sent_at: Instant,
}

/// Opaque handle into the retention list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetentionHandle(usize);

/// The set of packets sent but not yet confirmed by their peer's ack-list.
pub struct UnconfirmedList {
    entries: Slab<UnconfirmedEntry>,
    index: HashMap<(PeerId, u32), RetentionHandle>,
    capacity: Option<usize>,
}

impl UnconfirmedList {
    /// Create a retention list. `capacity` of `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        UnconfirmedList {
            entries: capacity.map_or_else(Slab::new, Slab::with_capacity),
            index: HashMap::new(),
            capacity,
        }
    }

    /// Record a sent packet. Returns `None` if the list is at capacity.
    pub fn insert(&mut self, peer: PeerId, seq: u32, packet: Packet, sent_at: Instant) -> Option<RetentionHandle> {
        if let Some(cap) = self.capacity {
            if self.entries.len() >= cap {
                return None;
            }
        }
        let key = self.entries.insert(UnconfirmedEntry {
            peer,
            seq,
            packet,
            sent_at,
        });
        let handle = RetentionHandle(key);
        self.index.insert((peer, seq), handle);
        Some(handle)
    }

    /// Remove and return the entry for `(peer, seq)`, if still outstanding.
    pub fn confirm(&mut self, peer: PeerId, seq: u32) -> Option<UnconfirmedEntry> {
        let handle = self.index.remove(&(peer, seq))?;
        self.entries.try_remove(handle.0)
    }

    /// Confirm every sequence number in `acks` for `peer`, returning how
    /// many were actually outstanding.
    pub fn confirm_all(&mut self, peer: PeerId, acks: &[u32]) -> usize {
        acks.iter()
            .filter(|&&seq| self.confirm(peer, seq).is_some())
            .count()
    }

    pub fn get(&self, handle: RetentionHandle) -> Option<&UnconfirmedEntry> {
        self.entries.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.entries.len() >= cap)
    }

    /// Every outstanding entry for `peer`, in no particular order.
    pub fn for_peer(&self, peer: PeerId) -> impl Iterator<Item = &UnconfirmedEntry> {
        self.entries.iter().filter(move |(_, e)| e.peer == peer).map(|(_, e)| e)
    }

    /// Remove every entry belonging to `peer` — used when a peer is reset
    /// or disconnected, since its unconfirmed packets will never be acked.
    pub fn drop_peer(&mut self, peer: PeerId) -> Vec<UnconfirmedEntry> {
        let keys: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, e)| e.peer == peer)
            .map(|(k, _)| k)
            .collect();
        let mut dropped = Vec::with_capacity(keys.len());
        for key in keys {
            let entry = self.entries.remove(key);
            self.index.remove(&(entry.peer, entry.seq));
            dropped.push(entry);
        }
        dropped
    }

    /// Entries sent before `cutoff`, candidates for retransmission.
    pub fn older_than(&self, cutoff: Instant) -> impl Iterator<Item = &UnconfirmedEntry> {
        self.entries.iter().filter(move |(_, e)| e.sent_at < cutoff).map(|(_, e)| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PacketType;
    use std::net::IpAddr;

    fn peer(port: u16) -> PeerId {
        PeerId::new("127.0.0.1".parse::<IpAddr>().unwrap(), port)
    }

    #[test]
    fn insert_and_confirm_roundtrip() {
        let mut list = UnconfirmedList::new(None);
        let p = peer(1);
        let pkt = Packet::new(PacketType::Dat, 5);
        list.insert(p, 5, pkt, Instant::now());
        assert_eq!(list.len(), 1);

        let confirmed = list.confirm(p, 5).unwrap();
        assert_eq!(confirmed.seq, 5);
        assert!(list.is_empty());
    }

    #[test]
    fn confirm_unknown_seq_is_noop() {
        let mut list = UnconfirmedList::new(None);
        assert!(list.confirm(peer(1), 999).is_none());
    }

    #[test]
    fn same_seq_different_peers_do_not_collide() {
        let mut list = UnconfirmedList::new(None);
        let a = peer(1);
        let b = peer(2);
        list.insert(a, 100, Packet::new(PacketType::Dat, 100), Instant::now());
        list.insert(b, 100, Packet::new(PacketType::Dat, 100), Instant::now());
        assert_eq!(list.len(), 2);

        list.confirm(a, 100);
        assert_eq!(list.len(), 1);
        assert!(list.confirm(b, 100).is_some());
    }

    #[test]
    fn capacity_limit_rejects_insert() {
        let mut list = UnconfirmedList::new(Some(1));
        let p = peer(1);
        assert!(list.insert(p, 1, Packet::new(PacketType::Dat, 1), Instant::now()).is_some());
        assert!(list.insert(p, 2, Packet::new(PacketType::Dat, 2), Instant::now()).is_none());
        assert!(list.is_full());
    }

    #[test]
    fn confirm_all_counts_matches() {
        let mut list = UnconfirmedList::new(None);
        let p = peer(1);
        list.insert(p, 1, Packet::new(PacketType::Dat, 1), Instant::now());
        list.insert(p, 2, Packet::new(PacketType::Dat, 2), Instant::now());
        let confirmed = list.confirm_all(p, &[1, 2, 3]);
        assert_eq!(confirmed, 2);
        assert!(list.is_empty());
    }

    #[test]
    fn drop_peer_removes_only_that_peers_entries() {
        let mut list = UnconfirmedList::new(None);
        let a = peer(1);
        let b = peer(2);
        list.insert(a, 1, Packet::new(PacketType::Dat, 1), Instant::now());
        list.insert(b, 1, Packet::new(PacketType::Dat, 1), Instant::now());
        let dropped = list.drop_peer(a);
        assert_eq!(dropped.len(), 1);
        assert_eq!(list.len(), 1);
        assert!(list.confirm(b, 1).is_some());
    }
}
