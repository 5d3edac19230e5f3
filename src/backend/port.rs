//! Ephemeral loopback port allocation.
//!
//! The socket is released before the backend binds the port, so another process can claim it in
//! between. This is accepted for a single-user loopback tool.

// std
use std::net::{Ipv4Addr, TcpListener};
// self
use crate::{_prelude::*, error::BackendError};

/// Binds `127.0.0.1:0`, reads back the assigned port, and releases the socket.
pub fn allocate() -> Result<u16> {
	let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
		.map_err(|source| BackendError::PortAllocation { source })?;
	let port =
		listener.local_addr().map_err(|source| BackendError::PortAllocation { source })?.port();

	drop(listener);

	Ok(port)
}
