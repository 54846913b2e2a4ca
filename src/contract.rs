//! The generic stream/pstream contract this module implements.
//!
//! A real host framework defines its own active- and passive-stream
//! capability tables and a TLS stream plugs into them as one more backend
//! alongside plain TCP. Since no such framework is linked here, these
//! traits stand in for it: [`ActiveTlsStream`](crate::tls::ActiveTlsStream)
//! and [`PassiveTlsListener`](crate::tls::PassiveTlsListener) implement
//! them directly, and a host would instead have its own trait of the same
//! shape with this crate's types plugged in as one variant.

use crate::error::{Status, WaitKind};
use crate::wait::Registrar;

/// The active-stream operation table: `open`/`close` happen outside this
/// trait (they're constructors and `Drop`), leaving the eight operations
/// that run during a connection's lifetime.
pub trait Stream {
    /// Drive the connection towards `Established`. Returns
    /// [`Status::Ready`] once established, [`Status::TryAgain`] if it
    /// would block, or an error status otherwise.
    fn connect(&mut self) -> Status;

    /// Read up to `buf.len()` bytes. `buf` must not be empty.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Status>;

    /// Accept `buf` for sending, taking ownership of its contents if it
    /// cannot be fully flushed immediately.
    fn send(&mut self, buf: &[u8]) -> Result<usize, Status>;

    /// Progress step: give a previously-parked send another chance to
    /// drain. Called by the host loop between poll cycles.
    fn run(&mut self);

    /// Register interest for the progress step (`run`), i.e. a pending
    /// buffered send.
    fn run_wait(&self, registrar: &mut dyn Registrar);

    /// Register interest for the given suspension point.
    fn wait(&self, kind: WaitKind, registrar: &mut dyn Registrar);
}

/// The passive-stream (listener) operation table.
pub trait PassiveStream {
    type Accepted: Stream;

    /// Accept one pending connection, or [`Status::TryAgain`] if the
    /// backlog is empty.
    fn accept(&mut self) -> Result<Self::Accepted, Status>;

    /// Register interest in the listening socket becoming readable.
    fn wait(&self, registrar: &mut dyn Registrar);
}
