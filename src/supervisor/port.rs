//! Loopback port selection.

use std::net::{Ipv4Addr, TcpListener};

use crate::{AppError, Result};

/// Return `requested`, or ask the OS for a free loopback port.
///
/// The ephemeral port is found by binding `127.0.0.1:0` and releasing the
/// socket again. Another process may take the port before the worker binds
/// it; the worker then fails to start and the caller may simply retry.
///
/// # Errors
///
/// Returns `AppError::Io` if no loopback socket can be bound.
pub fn select_port(requested: Option<u16>) -> Result<u16> {
    if let Some(port) = requested {
        return Ok(port);
    }

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|err| AppError::Io(format!("failed to reserve a loopback port: {err}")))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
