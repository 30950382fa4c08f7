//! UDP source/sink machine: a server role that learns its peer from the
//! first datagram received, and a client role connected to a fixed peer.
//! Grounded on `original_source/src/socket-machine.c`'s split between a
//! listening and a connected socket; `std::net::UdpSocket` replaces the raw
//! BSD socket calls directly, one-for-one.

use std::any::Any;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::Arena;
use crate::error::{ConduitError, Result};
use crate::handle::Handle;
use crate::registry;
use crate::status::{Blocking, Status};

use super::{Machine, MachineDesc};

const UDP_KIND: &str = "udp";

fn ensure_kind_registered() {
    if registry::find_kind(UDP_KIND).is_none() {
        let _ = registry::register_kind(UDP_KIND, 64 * 1024);
    }
}

fn register(machine: UdpMachine) -> Result<(Handle, SocketAddr)> {
    ensure_kind_registered();
    let handle = registry::request_handle(UDP_KIND)?;
    let local_addr = machine
        .local_addr()
        .map_err(|e| ConduitError::io_failed(handle, e))?;
    let desc = Arc::new(MachineDesc::new(
        handle,
        UDP_KIND,
        Arena::root().child(format!("udp{}", handle.raw())),
        Box::new(machine),
    ));
    registry::add_desc(desc);
    Ok((handle, local_addr))
}

/// `create("udp_server", bind_addr)`: binds and learns its peer from the
/// first datagram received. Returns the handle plus the actual bound
/// address (useful when `bind_addr`'s port is `0`).
pub fn new_udp_server_machine(bind_addr: SocketAddr) -> Result<(Handle, SocketAddr)> {
    let machine =
        UdpMachine::server(bind_addr).map_err(|e| ConduitError::io_failed(crate::handle::next_handle(), e))?;
    register(machine)
}

/// `create("udp_client", {bind_addr, remote_addr})`: binds and connects to a
/// fixed peer.
pub fn new_udp_client_machine(bind_addr: SocketAddr, remote_addr: SocketAddr) -> Result<(Handle, SocketAddr)> {
    let machine = UdpMachine::client(bind_addr, remote_addr)
        .map_err(|e| ConduitError::io_failed(crate::handle::next_handle(), e))?;
    register(machine)
}

pub struct UdpMachine {
    socket: UdpSocket,
    /// The server role only learns this on its first `recv_from`; the
    /// client role is pre-connected and never touches this field.
    peer: Mutex<Option<SocketAddr>>,
    connected: bool,
}

impl UdpMachine {
    pub fn server(bind_addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(UdpMachine {
            socket,
            peer: Mutex::new(None),
            connected: false,
        })
    }

    pub fn client(bind_addr: SocketAddr, remote_addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(remote_addr)?;
        Ok(UdpMachine {
            socket,
            peer: Mutex::new(Some(remote_addr)),
            connected: true,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Machine for UdpMachine {
    fn raw_read(&self, buf: &mut [u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        if self.connected {
            match self.socket.recv(buf) {
                Ok(n) => (n, Status::Success),
                Err(e) => {
                    tracing::error!(error = %e, "udp recv failed");
                    (0, Status::Error)
                }
            }
        } else {
            match self.socket.recv_from(buf) {
                Ok((n, from)) => {
                    *self.peer.lock() = Some(from);
                    (n, Status::Success)
                }
                Err(e) => {
                    tracing::error!(error = %e, "udp recv_from failed");
                    (0, Status::Error)
                }
            }
        }
    }

    fn raw_write(&self, buf: &[u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        if self.connected {
            match self.socket.send(buf) {
                Ok(n) => (n, Status::Success),
                Err(e) => {
                    tracing::error!(error = %e, "udp send failed");
                    (0, Status::Error)
                }
            }
        } else {
            let peer = *self.peer.lock();
            match peer {
                Some(addr) => match self.socket.send_to(buf, addr) {
                    Ok(n) => (n, Status::Success),
                    Err(e) => {
                        tracing::error!(error = %e, "udp send_to failed");
                        (0, Status::Error)
                    }
                },
                None => (0, Status::NoData),
            }
        }
    }

    fn stop(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
