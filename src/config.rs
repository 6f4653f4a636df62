//! Process-level configuration, loaded once at startup.
//!
//! Grounded on `client/config.rs`'s `Config`/`load` shape (TOML via
//! `serde`, per-field `#[serde(default = ...)]` fallbacks) adapted from
//! a single peer connection's settings to the daemon-wide settings that
//! sit above the per-peer files in `identity::conf`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GovpnError, Result};
use crate::identity::{MTU_DEFAULT, TIMEOUT_DEFAULT_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Address this process binds to (server mode) or dials (client mode).
    pub addr: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory of per-peer TOML files, see [`crate::identity::conf`].
    pub peers_dir: PathBuf,
    #[serde(default)]
    pub up_hook: Option<String>,
    #[serde(default)]
    pub down_hook: Option<String>,
    /// Local address for the stats HTTP endpoint; omitted disables it.
    #[serde(default)]
    pub stats_addr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

fn default_protocol() -> Protocol {
    Protocol::Udp
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Server,
    Client,
}

fn default_mtu() -> usize {
    MTU_DEFAULT
}

fn default_timeout_secs() -> u64 {
    TIMEOUT_DEFAULT_SECS
}

impl DaemonConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load(path: &str) -> Result<DaemonConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| GovpnError::ConfigError(format!("reading {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| GovpnError::ConfigError(format!("parsing {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let toml = r#"
            addr = "0.0.0.0:1194"
            peers_dir = "/etc/govpn/peers"
        "#;
        let conf: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(conf.protocol, Protocol::Udp);
        assert_eq!(conf.mode, Mode::Server);
        assert_eq!(conf.mtu, MTU_DEFAULT);
        assert_eq!(conf.timeout_secs, TIMEOUT_DEFAULT_SECS);
        assert!(conf.stats_addr.is_none());
    }

    #[test]
    fn loads_explicit_client_config() {
        let toml = r#"
            addr = "203.0.113.4:1194"
            protocol = "tcp"
            mode = "client"
            mtu = 1400
            timeout_secs = 30
            peers_dir = "./peers"
            up_hook = "/etc/govpn/up.sh"
            down_hook = "/etc/govpn/down.sh"
            stats_addr = "127.0.0.1:8080"
        "#;
        let conf: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(conf.protocol, Protocol::Tcp);
        assert_eq!(conf.mode, Mode::Client);
        assert_eq!(conf.mtu, 1400);
        assert_eq!(conf.up_hook.as_deref(), Some("/etc/govpn/up.sh"));
    }
}
