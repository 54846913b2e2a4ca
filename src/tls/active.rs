//! Nonblocking TCP-then-TLS client/server stream.
//!
//! This is the core of the crate: a single connection threads through
//! [`Phase::TcpConnecting`] → [`Phase::SslHandshaking`] →
//! [`Phase::Established`], with every suspension point either making
//! progress or returning [`Status::TryAgain`] and updating the
//! [`WantTracker`] (or, during the handshake, consulting the session's own
//! `wants_read`/`wants_write` directly) so the caller knows what to poll.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, ServerConnection};

use crate::contract::Stream as StreamContract;
use crate::error::{Status, Want, WaitKind};
use crate::name;
use crate::net;
use crate::wait::Registrar;
use crate::want::WantTracker;

use super::bootstrap;
use super::context::TlsContext;

/// Client or server side of a connection. Only the client role ever runs
/// the CA bootstrap controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Macro-state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TcpConnecting,
    SslHandshaking,
    Established,
}

/// Either side of a rustls connection, exposed through the handful of
/// methods this module drives directly. Both sides implement every one of
/// these (via `Deref<Target = ConnectionCommon<_>>`); this just erases the
/// role so the rest of the stream doesn't need to match on it.
enum Conn {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Conn {
    fn wants_read(&self) -> bool {
        match self {
            Conn::Client(c) => c.wants_read(),
            Conn::Server(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Conn::Client(c) => c.wants_write(),
            Conn::Server(c) => c.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Conn::Client(c) => c.is_handshaking(),
            Conn::Server(c) => c.is_handshaking(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Conn::Client(c) => c.read_tls(rd),
            Conn::Server(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Conn::Client(c) => c.write_tls(wr),
            Conn::Server(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<(), rustls::Error> {
        match self {
            Conn::Client(c) => c.process_new_packets().map(drop),
            Conn::Server(c) => c.process_new_packets().map(drop),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Conn::Client(c) => c.reader(),
            Conn::Server(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Conn::Client(c) => c.writer(),
            Conn::Server(c) => c.writer(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Conn::Client(c) => c.send_close_notify(),
            Conn::Server(c) => c.send_close_notify(),
        }
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            Conn::Client(c) => c.peer_certificates(),
            Conn::Server(c) => c.peer_certificates(),
        }
    }
}

/// One step of pumping ciphertext between the socket and the session.
enum SyncStep {
    /// Made progress (wrote or read some ciphertext); call again.
    Advanced,
    /// Neither direction wants I/O right now; nothing more to do.
    Idle,
    /// Blocked on socket I/O in the given direction.
    Blocked(Want),
    /// The peer closed the TCP connection while we still wanted to read.
    PeerClosed,
}

pub struct ActiveTlsStream {
    name: String,
    socket: mio::net::TcpStream,
    conn: Conn,
    role: Role,
    phase: Phase,
    pending: Option<Vec<u8>>,
    tracker: WantTracker,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    /// Set when this stream's `ClientConfig` was built with server-cert
    /// verification disabled, i.e. bootstrap mode was armed the moment
    /// this stream was opened. Checked again once the handshake completes
    /// to reject connections established mid-bootstrap-race.
    used_relaxed_verifier: bool,
}

impl ActiveTlsStream {
    /// `open(name, suffix)` for the active `ssl:` table: resolves
    /// `<host>[:<port>]`, kicks off a nonblocking TCP connect, and builds
    /// the client-side TLS session up front (its IO doesn't start until
    /// `connect()` reaches `SslHandshaking`).
    pub fn open(suffix: &str) -> Result<Self, Status> {
        TlsContext::global().new_stream_precondition().map_err(super::context_defect_to_status)?;

        let parsed = name::parse_active(suffix).map_err(|e| Status::Protocol(e.to_string()))?;
        let (socket, peer_addr) = net::connect_active(&parsed.host, parsed.port).map_err(Status::Os)?;

        socket.set_nodelay(true).map_err(|e| {
            log::error!("ssl:{suffix}: setsockopt(TCP_NODELAY): {e}");
            Status::Os(e)
        })?;

        let local_addr = socket.local_addr().ok();

        let ctx = TlsContext::global();
        let used_relaxed_verifier = ctx.bootstrap_armed();
        let config = if used_relaxed_verifier {
            ctx.relaxed_client_config()
        } else {
            ctx.client_config()
        }
        .map_err(|e| Status::Protocol(e.to_string()))?;

        let server_name = ServerName::try_from(parsed.host.clone())
            .map_err(|e| Status::Protocol(format!("invalid server name `{}`: {e}", parsed.host)))?;
        let conn = ClientConnection::new(config, server_name).map_err(Status::from)?;

        Ok(ActiveTlsStream {
            name: format!("ssl:{suffix}"),
            socket,
            conn: Conn::Client(conn),
            role: Role::Client,
            phase: Phase::TcpConnecting,
            pending: None,
            tracker: WantTracker::new(),
            peer_addr: Some(peer_addr),
            local_addr,
            used_relaxed_verifier,
        })
    }

    /// Wraps a freshly accepted TCP connection in the server role,
    /// starting directly in `SslHandshaking` (the TCP side is already
    /// connected by the time `accept()` hands it over).
    pub(crate) fn from_accepted(socket: mio::net::TcpStream, peer_addr: SocketAddr, name: String) -> Result<Self, Status> {
        TlsContext::global().new_stream_precondition().map_err(super::context_defect_to_status)?;

        socket.set_nodelay(true).map_err(|e| {
            log::error!("{name}: setsockopt(TCP_NODELAY): {e}");
            Status::Os(e)
        })?;

        let local_addr = socket.local_addr().ok();
        let config = TlsContext::global().server_config().map_err(|e| Status::Protocol(e.to_string()))?;
        let conn = ServerConnection::new(config).map_err(Status::from)?;

        Ok(ActiveTlsStream {
            name,
            socket,
            conn: Conn::Server(conn),
            role: Role::Server,
            phase: Phase::SslHandshaking,
            pending: None,
            tracker: WantTracker::new(),
            peer_addr: Some(peer_addr),
            local_addr,
            used_relaxed_verifier: false,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while a previous `send()` call's payload is still buffered
    /// waiting for `run()` to finish flushing it.
    pub fn has_pending_send(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn peer_certificate_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }

    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// One unit of ciphertext pumping: write if the session wants to
    /// write, else read if it wants to read, else nothing to do.
    fn sync_io_once(&mut self) -> Result<SyncStep, Status> {
        if self.conn.wants_write() {
            return match self.conn.write_tls(&mut self.socket) {
                Ok(_) => Ok(SyncStep::Advanced),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SyncStep::Blocked(Want::Writing)),
                Err(e) => Err(Status::Os(e)),
            };
        }
        if self.conn.wants_read() {
            return match self.conn.read_tls(&mut self.socket) {
                Ok(0) => Ok(SyncStep::PeerClosed),
                Ok(_) => {
                    self.conn.process_new_packets().map_err(Status::from)?;
                    Ok(SyncStep::Advanced)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SyncStep::Blocked(Want::Reading)),
                Err(e) => Err(Status::Os(e)),
            };
        }
        Ok(SyncStep::Idle)
    }

    /// Pumps `sync_io_once` until it blocks, goes idle, or the peer
    /// closes. Returns whether any progress was made at all (the
    /// "advanced" signal the want-tracker's deadlock/livelock rule keys
    /// on) alongside the terminal condition.
    fn drain_session_io(&mut self) -> Result<(bool, Option<Want>, bool), Status> {
        let mut advanced = false;
        loop {
            match self.sync_io_once()? {
                SyncStep::Advanced => advanced = true,
                SyncStep::Blocked(w) => return Ok((advanced, Some(w), false)),
                SyncStep::PeerClosed => return Ok((advanced, None, true)),
                SyncStep::Idle => return Ok((advanced, None, false)),
            }
        }
    }

    fn handshake_step(&mut self) -> Result<(), Status> {
        let (_, blocked, peer_closed) = self.drain_session_io()?;
        if peer_closed {
            return Err(Status::Protocol("peer closed the connection during the TLS handshake".into()));
        }
        if blocked.is_some() {
            return Err(Status::TryAgain);
        }
        Ok(())
    }

    /// Drives the connection through `TcpConnecting` → `SslHandshaking` →
    /// `Established`. Called repeatedly by the host loop until it returns
    /// anything other than `TryAgain`.
    pub fn connect(&mut self) -> Status {
        loop {
            match self.phase {
                Phase::TcpConnecting => match poll_connect_completion(&self.socket) {
                    Ok(true) => self.phase = Phase::SslHandshaking,
                    Ok(false) => return Status::TryAgain,
                    Err(e) => return Status::Os(e),
                },
                Phase::SslHandshaking => {
                    if let Err(status) = self.handshake_step() {
                        if status.is_try_again() {
                            return status;
                        }
                        log::warn!("{}: TLS handshake failed: {status}", self.name);
                        let _ = self.socket.shutdown(std::net::Shutdown::Both);
                        return status;
                    }

                    if self.role == Role::Client && self.used_relaxed_verifier {
                        if TlsContext::global().bootstrap_armed() {
                            return bootstrap::run(self);
                        }
                        log::error!("{}: rejecting SSL connection during bootstrap race window", self.name);
                        return Status::Protocol(
                            "connection established without verification outside an active bootstrap window".into(),
                        );
                    }

                    self.phase = Phase::Established;
                    return Status::Ready;
                }
                Phase::Established => return Status::Ready,
            }
        }
    }

    /// Attempts to drain `self.pending` through the session and onto the
    /// socket. `Ok(true)` means nothing remains buffered (flushed, or
    /// there was nothing to flush); `Ok(false)` means it parked with the
    /// want-tracker updated accordingly.
    fn push_pending(&mut self) -> Result<bool, Status> {
        let Some(mut payload) = self.pending.take() else {
            return Ok(true);
        };
        let handshaking_before = self.conn.is_handshaking();
        let mut advanced = false;

        loop {
            if !payload.is_empty() {
                match self.conn.writer().write(&payload) {
                    Ok(0) => {}
                    Ok(n) => {
                        payload.drain(..n);
                        advanced = true;
                        continue;
                    }
                    Err(e) => return Err(Status::Io(e.to_string())),
                }
            }

            match self.sync_io_once()? {
                SyncStep::Advanced => advanced = true,
                SyncStep::Idle => {
                    let fully_sent = payload.is_empty();
                    if !fully_sent {
                        self.pending = Some(payload);
                    }
                    self.tracker.after_write(Want::Nothing, advanced || handshaking_before != self.conn.is_handshaking());
                    return Ok(true);
                }
                SyncStep::Blocked(want) => {
                    self.pending = Some(payload);
                    self.tracker.after_write(want, advanced || handshaking_before != self.conn.is_handshaking());
                    return Ok(false);
                }
                SyncStep::PeerClosed => {
                    self.tracker.after_write(Want::Nothing, advanced);
                    return Err(Status::BrokenPipe);
                }
            }
        }
    }

    /// Zero-length requests are forbidden: the behavior of reading zero
    /// bytes through a TLS session is not well defined.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        assert!(!buf.is_empty(), "zero-length recv is forbidden");

        self.tracker.reset_rx();
        let handshaking_before = self.conn.is_handshaking();

        match self.conn.reader().read(buf) {
            Ok(n) if n > 0 => {
                self.tracker.after_read(Want::Nothing, handshaking_before != self.conn.is_handshaking());
                return Ok(n);
            }
            Ok(_) => {}
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => return Err(Status::Io(e.to_string())),
            Err(_) => {}
        }

        let (advanced, blocked, peer_closed) = self.drain_session_io()?;
        let advanced = advanced || handshaking_before != self.conn.is_handshaking();

        if peer_closed {
            self.tracker.after_read(Want::Nothing, advanced);
            return Ok(0);
        }
        if let Some(want) = blocked {
            self.tracker.after_read(want, advanced);
            return Err(Status::TryAgain);
        }

        match self.conn.reader().read(buf) {
            Ok(n) => {
                self.tracker.after_read(Want::Nothing, advanced);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.tracker.after_read(Want::Nothing, advanced);
                Err(Status::TryAgain)
            }
            Err(e) => Err(Status::Io(e.to_string())),
        }
    }

    /// If a previous payload is still buffered, backpressure: returns
    /// `TryAgain` without copying `buf`. Otherwise takes an owned copy and
    /// pushes as much of it through the session as will go immediately.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Status> {
        if self.pending.is_some() {
            return Err(Status::TryAgain);
        }

        let n = buf.len();
        self.pending = Some(buf.to_vec());
        match self.push_pending() {
            Ok(_) => Ok(n),
            Err(Status::BrokenPipe) => {
                self.pending = None;
                Err(Status::BrokenPipe)
            }
            Err(e) => {
                self.pending = None;
                Err(e)
            }
        }
    }

    /// Progress step: give a previously-parked send another chance.
    pub fn run(&mut self) {
        if self.pending.is_some() {
            if let Err(status) = self.push_pending() {
                if !status.is_try_again() {
                    log::debug!("{}: dropping pending send after error: {status}", self.name);
                    self.pending = None;
                }
            }
        }
    }

    pub fn run_wait(&self, registrar: &mut dyn Registrar) {
        let want = self.tracker.tx_want();
        if want != Want::Nothing {
            registrar.wait_for(self.fd(), want);
        }
    }

    pub fn wait(&self, kind: WaitKind, registrar: &mut dyn Registrar) {
        match kind {
            WaitKind::Connect => match self.phase {
                Phase::TcpConnecting => registrar.wait_for(self.fd(), Want::Writing),
                Phase::SslHandshaking => {
                    let want = if self.conn.wants_write() { Want::Writing } else { Want::Reading };
                    registrar.wait_for(self.fd(), want);
                }
                Phase::Established => registrar.wake_immediately(),
            },
            WaitKind::Recv => {
                let want = self.tracker.rx_want();
                if want == Want::Nothing {
                    registrar.wake_immediately();
                } else {
                    registrar.wait_for(self.fd(), want);
                }
            }
            WaitKind::Send => {
                if self.pending.is_none() {
                    registrar.wake_immediately();
                }
                // A pending buffer's wait is covered by `run_wait`.
            }
        }
    }
}

impl StreamContract for ActiveTlsStream {
    fn connect(&mut self) -> Status {
        ActiveTlsStream::connect(self)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        ActiveTlsStream::recv(self, buf)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, Status> {
        ActiveTlsStream::send(self, buf)
    }

    fn run(&mut self) {
        ActiveTlsStream::run(self)
    }

    fn run_wait(&self, registrar: &mut dyn Registrar) {
        ActiveTlsStream::run_wait(self, registrar)
    }

    fn wait(&self, kind: WaitKind, registrar: &mut dyn Registrar) {
        ActiveTlsStream::wait(self, kind, registrar)
    }
}

impl AsRawFd for ActiveTlsStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl Drop for ActiveTlsStream {
    /// Clears any outbound buffer and attempts a one-shot close
    /// notification: no retry, no blocking. Good enough most of the time,
    /// never guaranteed.
    fn drop(&mut self) {
        self.pending = None;
        self.conn.send_close_notify();
        let _ = self.conn.write_tls(&mut self.socket);
    }
}

/// Mirrors `check_connection_completion`: a nonblocking `connect(2)` is
/// done once the socket reports no pending error and is connected.
fn poll_connect_completion(socket: &mio::net::TcpStream) -> io::Result<bool> {
    match socket.take_error()? {
        Some(e) => Err(e),
        None => match socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        },
    }
}
