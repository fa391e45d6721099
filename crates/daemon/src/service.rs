//! Systemd service integration
//!
//! Minimal sd-notify client: READY, STATUS and STOPPING messages sent over
//! the datagram socket named by `NOTIFY_SOCKET`. Outside systemd every call
//! is a no-op.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use tracing::{debug, info};

const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

fn notify(message: &str) -> Result<bool> {
    let Ok(socket_path) = env::var(NOTIFY_SOCKET) else {
        debug!("{} not set, skipping systemd notification", NOTIFY_SOCKET);
        return Ok(false);
    };

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send '{}' to systemd", message))?;
    Ok(true)
}

/// Tell systemd the startup rescan is done
pub fn notify_ready() -> Result<()> {
    if notify("READY=1")? {
        info!("Notified systemd: service ready");
    }
    Ok(())
}

/// Tell systemd the shutdown sequence has begun
pub fn notify_stopping() -> Result<()> {
    if notify("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if notify(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

pub fn is_systemd() -> bool {
    env::var(NOTIFY_SOCKET).is_ok()
}
