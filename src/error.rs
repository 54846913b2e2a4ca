//! Status codes returned by every suspension point in this crate.
//!
//! These map directly onto the seven error kinds a stream operation can
//! report: a caller matches on [`Status`] rather than downcasting an opaque
//! [`std::error::Error`].

use std::fmt;
use std::io;

/// Outcome of an operation that may need to suspend.
#[derive(Debug, thiserror::Error)]
pub enum Status {
    /// The operation would block; re-poll using the wait registered for it.
    #[error("try again")]
    TryAgain,

    /// Internal success marker for operations (`connect`, `accept`) that
    /// otherwise report failure through this enum. Never returned from
    /// `recv`/`send`, which report success as `Ok(n)`.
    #[error("ready")]
    Ready,

    /// Required key/cert/CA is missing, or the key does not match the cert.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Handshake failure, bootstrap policy violation, or an intentional
    /// post-bootstrap reconnect signal.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Clean TLS close observed while sending.
    #[error("broken pipe")]
    BrokenPipe,

    /// Underlying syscall failure, verbatim.
    #[error("OS error: {0}")]
    Os(#[source] io::Error),

    /// TLS-layer error without a more specific classification.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Status {
    pub fn is_try_again(&self) -> bool {
        matches!(self, Status::TryAgain)
    }

    /// True for conditions that must never reach the logger (recoverable
    /// "wants I/O").
    pub fn is_quiet(&self) -> bool {
        matches!(self, Status::TryAgain)
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock {
            Status::TryAgain
        } else {
            Status::Os(e)
        }
    }
}

impl From<rustls::Error> for Status {
    fn from(e: rustls::Error) -> Self {
        Status::Protocol(e.to_string())
    }
}

/// Result of a `recv`/`send` call: either bytes moved, or a [`Status`]
/// explaining why none did.
pub type IoResult<T> = Result<T, Status>;

/// The three directions the underlying TLS library can report wanting.
///
/// `Nothing` means the previous call completed (successfully or with a hard
/// error) and there is no need to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Want {
    #[default]
    Nothing,
    Reading,
    Writing,
}

impl fmt::Display for Want {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Want::Nothing => "nothing",
            Want::Reading => "reading",
            Want::Writing => "writing",
        };
        f.write_str(s)
    }
}

/// What a caller is waiting for when it calls `wait()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Connect,
    Recv,
    Send,
}
