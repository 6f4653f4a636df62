//! TAP device and up/down hook invocation.
//!
//! Grounded on `client/device.rs`'s `Device`/`DeviceHandler` split: a
//! dedicated task owns the `tun` crate's async handle and selects
//! between reading frames off the device and writing frames handed to
//! it over a channel, so the rest of the daemon never blocks on device
//! I/O. Hook invocation is grounded on `common.go`'s `ScriptCall(path,
//! ifaceName)`: both hooks take the already-known TAP interface name
//! as their sole argument.

use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{GovpnError, Result};

#[derive(Clone)]
pub struct TapConfig {
    pub mtu: usize,
}

/// Handle to a running TAP interface. `recv` yields frames read off
/// the device; `send` queues a frame for the device's write side.
pub struct TapDevice {
    to_device_tx: mpsc::Sender<Vec<u8>>,
    from_device_rx: mpsc::Receiver<Vec<u8>>,
}

impl TapDevice {
    /// Create the interface and spawn its read/write task. Returns the
    /// device handle plus the kernel-assigned interface name.
    pub async fn create(config: TapConfig) -> Result<(Self, String)> {
        let mut tun_config = tun::Configuration::default();
        tun_config.mtu(config.mtu as u16).up();

        #[cfg(target_os = "linux")]
        tun_config.platform_config(|platform| {
            platform.ensure_root_privileges(true);
        });

        let dev = tun::create_as_async(&tun_config).map_err(|e| GovpnError::Fatal(e.to_string()))?;
        let name = dev.tun_name().map_err(|e| GovpnError::Fatal(e.to_string()))?;

        let (from_device_tx, from_device_rx) = mpsc::channel(1024);
        let (to_device_tx, to_device_rx) = mpsc::channel(1024);

        tokio::spawn(run_device(dev, from_device_tx, to_device_rx));

        Ok((
            Self {
                to_device_tx,
                from_device_rx,
            },
            name,
        ))
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_device_rx.recv().await
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.to_device_tx
            .send(frame)
            .await
            .map_err(|_| GovpnError::Fatal("tap device task has exited".into()))
    }
}

/// The device's own task: concurrently read frames off the kernel
/// interface and write frames queued by the rest of the daemon.
async fn run_device(
    mut dev: tun::AsyncDevice,
    from_device_tx: mpsc::Sender<Vec<u8>>,
    mut to_device_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            result = dev.read(&mut buf) => {
                match result {
                    Ok(n) => {
                        if from_device_tx.send(buf[..n].to_vec()).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "tap device read failed");
                        return;
                    }
                }
            }
            frame = to_device_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = dev.write(&frame).await {
                            tracing::error!(error = %e, "tap device write failed");
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

/// Run a hook with the TAP interface name as its sole argument,
/// mirroring `ScriptCall(path, ifaceName)`: a missing `path` is a
/// silent no-op (hooks are optional), any other spawn failure or
/// non-zero exit is logged but never propagated — a broken up/down
/// script must not take the session down with it.
async fn run_hook(path: &str, iface: &str) {
    let status = Command::new(path)
        .arg(iface)
        .stdin(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if !status.success() => {
            tracing::warn!(%path, %iface, ?status, "hook exited non-zero");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(%path, %iface, error = %e, "hook failed to spawn"),
    }
}

/// Run the up-hook once `iface` is ready to carry traffic for a newly
/// established session.
pub async fn run_up_hook(path: &str, iface: &str) {
    run_hook(path, iface).await;
}

/// Run the down-hook once a session's interface is about to be torn down.
pub async fn run_down_hook(path: &str, iface: &str) {
    run_hook(path, iface).await;
}
