//! Nonblocking TLS stream and listener adapters for a poll-driven stream
//! framework.
//!
//! This crate provides two pluggable transports that conform to a generic
//! stream/pstream contract (see [`contract`]) so that a higher layer can
//! treat TLS and plain TCP uniformly:
//!
//! - [`tls::ActiveTlsStream`]: upgrades an outbound (or accepted) TCP
//!   connection to TLS, threading OpenSSL-style "needs read to write"
//!   renegotiation semantics through a single poll-driven call sequence
//!   without ever blocking.
//! - [`tls::PassiveTlsListener`]: binds a TCP port and wraps each accepted
//!   connection in an [`tls::ActiveTlsStream`] in the server role.
//!
//! TLS configuration lives on the process-wide [`tls::TlsContext`], set up
//! by a handful of non-failing setter calls before any stream is opened.
//! The one piece of genuinely stateful protocol logic beyond the
//! handshake itself is trust-on-first-use CA bootstrap: see
//! [`tls::TlsContext::set_ca_cert_file`].
//!
//! Everything here is driven from a single thread with no blocking calls;
//! suspension points return [`error::Status::TryAgain`] and the caller
//! re-polls using the direction reported through [`wait::Registrar`].

pub mod certs;
pub mod contract;
pub mod error;
pub mod name;
pub mod net;
pub mod rate_limit;
pub mod tls;
pub mod wait;
pub mod want;

pub use error::{Status, Want, WaitKind};
pub use tls::{ActiveTlsStream, ConfigDefect, PassiveTlsListener, Phase, Role, TlsContext};
