pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod substrate;
pub mod tap;
pub mod telemetry;
pub mod transport;

pub use error::{GovpnError, Result};
