//! TLS stream and listener backends: the process-wide context, the
//! nonblocking active stream and its bootstrap controller, and the
//! passive listener that wraps accepted connections in the same stream
//! type.

mod active;
mod bootstrap;
mod context;
mod listener;
mod verifier;

pub use active::{ActiveTlsStream, Phase, Role};
pub use context::{ConfigDefect, TlsContext};
pub use listener::PassiveTlsListener;

use crate::error::Status;

/// Maps a configuration precondition failure onto the `not configured`
/// status every suspension point may report.
pub(crate) fn context_defect_to_status(defect: ConfigDefect) -> Status {
    let msg: &'static str = match defect {
        ConfigDefect::MissingPrivateKey => "private key must be configured to use TLS",
        ConfigDefect::MissingCertificate => "certificate must be configured to use TLS",
        ConfigDefect::MissingTrustAnchor => "CA certificate must be configured to use TLS",
        ConfigDefect::KeyCertMismatch => "private key does not match certificate public key",
    };
    Status::NotConfigured(msg)
}
