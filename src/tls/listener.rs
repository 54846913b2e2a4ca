//! Passive TLS listener: binds a TCP port, accepts connections, and wraps
//! each one in [`ActiveTlsStream`] in the server role.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use crate::contract::PassiveStream;
use crate::error::{Status, Want};
use crate::name;
use crate::net;
use crate::wait::Registrar;

use super::active::ActiveTlsStream;
use super::context::TlsContext;

pub struct PassiveTlsListener {
    listener: mio::net::TcpListener,
    /// Bound display name, read back from the real listening socket after
    /// `bind()` — not left as an unpopulated stack value the way the
    /// source this was distilled from did.
    name: String,
}

impl PassiveTlsListener {
    /// `open(name, suffix)` for the passive `pssl:` table:
    /// `[<port>][:<bind-addr>]`.
    pub fn open(suffix: &str) -> Result<Self, Status> {
        TlsContext::global().new_stream_precondition().map_err(super::context_defect_to_status)?;

        let parsed = name::parse_passive(suffix).map_err(|e| Status::Protocol(e.to_string()))?;
        let ip = parsed.bind_addr.unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let bind_addr = SocketAddr::new(ip, parsed.port);

        let listener = net::open_passive(bind_addr).map_err(Status::Os)?;
        let bound = listener.local_addr().map_err(Status::Os)?;

        Ok(PassiveTlsListener { listener, name: format!("pssl:{}:{}", bound.port(), bound.ip()) })
    }

    pub fn bound_name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn accept(&mut self) -> Result<ActiveTlsStream, Status> {
        let (socket, peer_addr) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(Status::TryAgain),
            Err(e) => {
                log::debug!("{}: accept: {e}", self.name);
                return Err(Status::Os(e));
            }
        };

        ActiveTlsStream::from_accepted(socket, peer_addr, server_display_name(peer_addr))
    }

    pub fn wait(&self, registrar: &mut dyn Registrar) {
        registrar.wait_for(self.fd(), Want::Reading);
    }
}

impl AsRawFd for PassiveTlsListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl PassiveStream for PassiveTlsListener {
    type Accepted = ActiveTlsStream;

    fn accept(&mut self) -> Result<Self::Accepted, Status> {
        PassiveTlsListener::accept(self)
    }

    fn wait(&self, registrar: &mut dyn Registrar) {
        PassiveTlsListener::wait(self, registrar)
    }
}

/// Formats an accepted connection's display name: `ssl:<ip>`, or
/// `ssl:<ip>:<port>` when the peer's port isn't the default.
pub(crate) fn server_display_name(peer: SocketAddr) -> String {
    if peer.port() == name::DEFAULT_PORT {
        format!("ssl:{}", peer.ip())
    } else {
        format!("ssl:{}:{}", peer.ip(), peer.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_omits_default_port() {
        let addr: SocketAddr = "10.0.0.1:6633".parse().unwrap();
        assert_eq!(server_display_name(addr), "ssl:10.0.0.1");
    }

    #[test]
    fn display_name_includes_nondefault_port() {
        let addr: SocketAddr = "10.0.0.1:55000".parse().unwrap();
        assert_eq!(server_display_name(addr), "ssl:10.0.0.1:55000");
    }
}
