//! Substrate abstraction: the datagram vs. stream carrier beneath the
//! handshake and transport engines.
//!
//! Grounded on `network/mod.rs`'s `Connection`/`Listener` traits for
//! the shape of the abstraction, and on `client/p2p/udp_server.rs` and
//! `network/tcp_connection.rs` for the two concrete implementations.
//! UDP preserves datagram boundaries and permits reordering; TCP is
//! framed with a 16-bit big-endian length prefix and requires strict
//! in-order delivery, per spec §4.1's substrate requirements.

pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// One side of a point-to-point carrier. A server-side substrate
/// multiplexes many remote addresses through one socket; a
/// client-side substrate talks to a single fixed remote. Either way
/// `reorderable()` tells the session layer which
/// [`crate::transport::ReplayMode`] to build.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Receive one datagram (or framed message), returning its bytes
    /// and the address it came from.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Send one datagram (or framed message) to `addr`.
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()>;

    /// Whether datagrams may arrive out of order on this substrate.
    fn reorderable(&self) -> bool;
}
