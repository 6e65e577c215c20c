//! Fragmentation and reassembly.
//!
//! Outbound messages larger than the configured `max_mtu` are split into
//! chunks that share one `id` and carry the chunk count in `qty`; the
//! receiving side buffers chunks by `(peer, id)` until all `qty` have
//! arrived and only then dispatches the reassembled message as a single
//! unit — a partial group is never handed to the caller piecemeal.
//!
//! Grounded in the teacher's `FragmentAssembler` (`receiver.rs`), adapted
//! from its Start/Middle/End flag model to the id/qty grouping this
//! protocol uses.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};

use crate::peer::PeerId;

/// Split `data` into chunks no larger than `max_mtu`. A payload that
/// already fits in one chunk still returns a single-element vec; callers
/// decide whether to mark `qty` as 0 (unfragmented) or 1+ based on length.
pub fn split_into_fragments(data: &Bytes, max_mtu: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return vec![Bytes::new()];
    }
    let mut chunks = Vec::with_capacity(data.len().div_ceil(max_mtu));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + max_mtu).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

struct ReassemblyGroup {
    qty: u32,
    chunks: BTreeMap<u32, Bytes>,
}

/// Buffers fragments per `(peer, id)` until a complete group arrives.
#[derive(Default)]
pub struct Reassembler {
    groups: HashMap<(PeerId, u32), ReassemblyGroup>,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            groups: HashMap::new(),
        }
    }

    /// Feed one fragment into its group. Returns the concatenated message
    /// plus every sequence number that contributed to it once the group is
    /// complete; returns `None` while fragments are still missing.
    ///
    /// `seq` is the fragment's sequence number in the peer's stream, `qty`
    /// is the group's total fragment count as carried on every fragment.
    pub fn insert(
        &mut self,
        peer: PeerId,
        id: u32,
        seq: u32,
        qty: u32,
        data: Bytes,
    ) -> Option<(Bytes, Vec<u32>)> {
        let group = self
            .groups
            .entry((peer, id))
            .or_insert_with(|| ReassemblyGroup {
                qty,
                chunks: BTreeMap::new(),
            });
        group.chunks.insert(seq, data);

        if group.chunks.len() as u32 >= group.qty {
            let group = self.groups.remove(&(peer, id)).expect("just inserted");
            let mut out = BytesMut::new();
            let mut seqs = Vec::with_capacity(group.chunks.len());
            for (seq, chunk) in group.chunks {
                seqs.push(seq);
                out.extend_from_slice(&chunk);
            }
            Some((out.freeze(), seqs))
        } else {
            None
        }
    }

    /// Discard any in-progress group for `peer`, e.g. on reset/disconnect.
    pub fn drop_peer(&mut self, peer: PeerId) {
        self.groups.retain(|(p, _), _| *p != peer);
    }

    /// Number of fragment groups currently buffered (test/introspection).
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }
}
