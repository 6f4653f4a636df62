//! UDP substrate: one socket serving every peer address at once,
//! datagram boundaries preserved, reordering permitted.
//!
//! Grounded on `client/p2p/udp_server.rs`'s bind/`recv_from`/`send_to`
//! shape, simplified to a single dual-purpose socket since GoVPN has
//! no STUN hole-punching or dual-stack port split to replicate.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::substrate::Substrate;

pub struct UdpSubstrate {
    socket: UdpSocket,
}

impl UdpSubstrate {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(%addr, "udp substrate listening");
        Ok(Self { socket })
    }

    /// Bind an ephemeral local socket and implicitly connect to
    /// `remote`, the client-side shape: every send targets `remote`
    /// and `recv_from` only ever reports datagrams from it.
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Substrate for UdpSubstrate {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    fn reorderable(&self) -> bool {
        true
    }
}
