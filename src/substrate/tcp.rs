//! TCP substrate: one stream per peer, each payload framed with a
//! 16-bit big-endian length prefix, strict in-order delivery.
//!
//! Grounded on `network/tcp_connection.rs`'s buffered read loop and
//! `network/tcp_listener.rs`'s accept-with-backoff loop, adapted from
//! that file's block-cipher framing to GoVPN's own handshake/transport
//! wire format riding unencrypted inside the length prefix.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{GovpnError, Result};
use crate::substrate::Substrate;

const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// A single accepted or dialed TCP stream, always talking to the one
/// `peer_addr` it was bound at.
pub struct TcpSubstrate {
    peer_addr: SocketAddr,
    read_half: Mutex<tokio::net::tcp::OwnedReadHalf>,
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

impl TcpSubstrate {
    fn from_stream(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer_addr,
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
        }
    }

    /// Dial the client side of a TCP substrate.
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote).await?;
        Ok(Self::from_stream(stream, remote))
    }

    /// Accept one connection with exponential backoff on transient
    /// errors, mirroring `TCPListener::accept`.
    pub async fn accept_one(listener: &TcpListener) -> Result<Self> {
        let mut backoff = 1u64;
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => return Ok(Self::from_stream(socket, addr)),
                Err(err) => match err.kind() {
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::WouldBlock => {
                        if backoff > 64 {
                            return Err(err.into());
                        }
                        tracing::warn!(backoff, error = %err, "accept failed, retrying");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff *= 2;
                    }
                    _ => return Err(err.into()),
                },
            }
        }
    }
}

#[async_trait]
impl Substrate for TcpSubstrate {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut read_half = self.read_half.lock().await;
        let mut len_bytes = [0u8; 2];
        read_half.read_exact(&mut len_bytes).await?;
        let len = u16::from_be_bytes(len_bytes) as usize;
        if len > buf.len() {
            return Err(GovpnError::MalformedDatagram {
                addr: Some(self.peer_addr),
                reason: "tcp frame exceeds caller's buffer",
            });
        }
        read_half.read_exact(&mut buf[..len]).await?;
        Ok((len, self.peer_addr))
    }

    async fn send_to(&self, data: &[u8], _addr: SocketAddr) -> Result<()> {
        if data.len() > MAX_FRAME_LEN {
            return Err(GovpnError::Fatal(format!(
                "tcp substrate frame of {} bytes exceeds the 16-bit length prefix",
                data.len()
            )));
        }
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&(data.len() as u16).to_be_bytes()).await?;
        write_half.write_all(data).await?;
        write_half.flush().await?;
        Ok(())
    }

    fn reorderable(&self) -> bool {
        false
    }
}
