//! Typed error kinds for the handshake and transport engines.
//!
//! Every variant here corresponds to one of the error kinds named in
//! the protocol design: nothing a remote peer can trigger is fatal,
//! so callers match on these variants rather than treating them as
//! opaque failures. [`GovpnError::ConfigError`] and
//! [`GovpnError::Fatal`] are the only kinds that ever abort a running
//! process.

use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, GovpnError>;

#[derive(Debug, thiserror::Error)]
pub enum GovpnError {
    /// Buffer too short, bad length prefix, bad padding terminator.
    #[error("malformed datagram from {addr:?}: {reason}")]
    MalformedDatagram {
        addr: Option<SocketAddr>,
        reason: &'static str,
    },

    /// Poly1305 mismatch or AONT checksum failure.
    #[error("authentication failed from {addr:?}")]
    AuthenticationFailed { addr: Option<SocketAddr> },

    /// Nonce already seen, or too far behind the replay window.
    #[error("replayed or stale frame from {addr:?}")]
    ReplayedOrOld { addr: Option<SocketAddr> },

    /// Wrong message size, bad Elligator point, Rs mismatch, bad signature.
    #[error("handshake protocol error with {addr}: {reason}")]
    HandshakeProtocolError {
        addr: SocketAddr,
        reason: &'static str,
    },

    /// Identity tag matched no configured peer.
    #[error("unknown identity from {addr}")]
    UnknownIdentity { addr: SocketAddr },

    /// Unreadable verifier, bad hex, missing peer file. Fatal at startup only.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Random source failure, TAP open failure on rehandshake. Aborts the session.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GovpnError {
    /// True for every kind that must never abort the process: the
    /// session supervisor drops the packet/handshake state and moves on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GovpnError::ConfigError(_) | GovpnError::Fatal(_))
    }
}
