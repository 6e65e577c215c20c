//! Engine configuration — tunables with defaults matching the protocol's
//! reference constants (spec §6). Grounded in the teacher crate's
//! `SenderConfig`/`ReceiverConfig` `Default` pattern (one struct, plain
//! fields, `..Default::default()` overrides in tests).

use std::time::Duration;

/// Whether this engine instance behaves as a client (connecting to one
/// remote) or a server (listening for many).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Tunable engine parameters. All fields have defaults from spec §6;
/// override individual fields with struct-update syntax.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base transport unit in bytes.
    pub mtu: usize,
    /// Fragmentation threshold in bytes. Defaults to `0.80 * mtu`.
    pub max_mtu: usize,
    /// Send-loop tick interval.
    pub send_frequency: Duration,
    /// Recv-loop tick interval.
    pub recv_frequency: Duration,
    /// Wrap point for the per-peer fragmentation message id.
    pub packet_id_limit: u32,
    /// Server-side forced-reset point for a peer's outbound sequence.
    pub sequence_limit: u32,
    /// Initial outbound `seq` used by a client talking to a peer.
    pub client_start_sequence: u32,
    /// Initial outbound `seq` used by a server talking to a peer.
    pub server_start_sequence: u32,
    /// Max packets drained from the recv queue per recv-loop tick.
    pub recv_batch_size: usize,
    /// Delay before a client resyncs after receiving RST.
    pub reset_delay: Duration,
    /// Optional cap on the unconfirmed retention list and send queue.
    /// `None` means unbounded, matching spec's silence on the matter.
    pub pool_capacity: Option<usize>,
    /// Server-side: how often the send loop should broadcast a keep-alive
    /// `NUL` to every known client on its own, with no application call
    /// to `send_keep_alive` required. `None` (the default) disables this;
    /// the application remains free to call `send_keep_alive` manually
    /// either way.
    pub keep_alive_interval: Option<Duration>,
}

impl Config {
    /// Build a `Config` for the given MTU, deriving `max_mtu` as `0.80 *
    /// mtu`. Use struct-update syntax on the result to override anything
    /// else.
    pub fn with_mtu(mtu: usize) -> Self {
        Config {
            mtu,
            max_mtu: (mtu as f64 * 0.80) as usize,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mtu = 1500;
        Config {
            mtu,
            max_mtu: (mtu as f64 * 0.80) as usize,
            send_frequency: Duration::from_millis(10),
            recv_frequency: Duration::from_millis(10),
            packet_id_limit: u32::MAX / 2,
            sequence_limit: u32::MAX / 2,
            client_start_sequence: 100,
            server_start_sequence: 200,
            recv_batch_size: 50,
            reset_delay: Duration::from_secs(1),
            pool_capacity: None,
            keep_alive_interval: None,
        }
    }
}
