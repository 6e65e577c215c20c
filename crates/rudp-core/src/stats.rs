//! # Engine Statistics
//!
//! Ambient observability about the reliable-delivery engine itself —
//! packets sent/received/retransmitted/confirmed and the live unconfirmed-
//! list depth. Not a congestion signal, just bookkeeping a caller can poll
//! or export as JSON. Grounded in the teacher's `SenderStats`/
//! `ReceiverStats` (atomically-updated counters, `Serialize`-derived
//! snapshot struct).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters updated from the send/recv pipelines. Cheap to share
/// across the worker threads: every field is an independent atomic, no
/// lock required to bump one.
#[derive(Debug, Default)]
pub struct EngineStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_retransmitted: AtomicU64,
    packets_confirmed: AtomicU64,
    decode_errors: AtomicU64,
    resets: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmitted(&self) {
        self.packets_retransmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self, count: u64) {
        self.packets_confirmed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time, serializable snapshot. `unconfirmed_depth` is
    /// supplied by the caller since it lives behind the ack-lock, not here.
    pub fn snapshot(&self, unconfirmed_depth: usize) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_retransmitted: self.packets_retransmitted.load(Ordering::Relaxed),
            packets_confirmed: self.packets_confirmed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            unconfirmed_depth,
        }
    }
}

/// A JSON-exportable snapshot of [`EngineStats`] at one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_retransmitted: u64,
    pub packets_confirmed: u64,
    pub decode_errors: u64,
    pub resets: u64,
    pub unconfirmed_depth: usize,
}
