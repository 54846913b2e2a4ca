//! Stand-ins for the host framework's active/passive TCP connect helpers.
//!
//! A real host framework hands this crate already-nonblocking sockets; it
//! owns DNS resolution, `SO_REUSEADDR`, and so on. These two functions play
//! that role for this crate in isolation: resolve a host/port, open a
//! nonblocking socket, and kick off (or complete) the connect/listen. `mio`
//! sockets are always nonblocking, so there is no separate "set
//! nonblocking" step the way there would be with `std::net`.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::{TcpListener, TcpStream};

/// Opens a nonblocking TCP connection to `host:port`. The connect may
/// still be in progress when this returns; the caller drives completion
/// via repeated `connect()` polling, exactly as a host framework's
/// `inet_open_active` would.
pub fn connect_active(host: &str, port: u16) -> io::Result<(TcpStream, SocketAddr)> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address found for {host}")))?;
    let stream = TcpStream::connect(addr)?;
    Ok((stream, addr))
}

/// Binds a nonblocking TCP listening socket. Nagle is left enabled on the
/// listener itself and only disabled on accepted connections, matching the
/// original source.
pub fn open_passive(bind_addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(bind_addr)
}
