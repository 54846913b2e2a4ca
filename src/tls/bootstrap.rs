//! Trust-on-first-use CA bootstrap controller.
//!
//! Runs exactly once, at the moment a client handshake first completes
//! with bootstrap mode armed (see [`ActiveTlsStream::connect`]). Captures
//! the peer's self-signed root, persists it exclusively, reconfigures the
//! context, and always reports a protocol error — the caller is expected
//! to reconnect, at which point the newly armed trust anchor is enforced
//! normally.
//!
//! [`ActiveTlsStream::connect`]: super::active::ActiveTlsStream::connect

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;

use crate::certs;
use crate::error::Status;

use super::active::ActiveTlsStream;
use super::context::TlsContext;

pub(crate) fn run(stream: &mut ActiveTlsStream) -> Status {
    let chain = match stream.peer_certificate_chain() {
        Some(chain) if !chain.is_empty() => chain,
        _ => {
            log::error!("could not bootstrap CA cert: no certificate presented by peer");
            return Status::Protocol("bootstrap: peer presented no certificate".into());
        }
    };

    let candidate = chain.last().expect("checked non-empty above").clone();
    let chain_len = chain.len();

    match certs::is_self_signed(&candidate) {
        Ok(true) => {}
        Ok(false) => {
            log::error!(
                "could not bootstrap CA cert: obtained certificate is not self-signed"
            );
            if chain_len < 2 {
                log::error!(
                    "only one certificate was received, so probably the peer is not \
                     configured to send its CA certificate"
                );
            }
            return Status::Protocol("bootstrap: candidate root is not self-signed".into());
        }
        Err(e) => {
            log::error!("could not bootstrap CA cert: {e}");
            return Status::Protocol(format!("bootstrap: candidate root is malformed: {e}"));
        }
    }

    let path = match TlsContext::global().bootstrap_path() {
        Some(path) => path,
        None => {
            log::error!("could not bootstrap CA cert: no bootstrap path armed");
            return Status::Protocol("bootstrap: no path armed".into());
        }
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).mode(0o444).open(&path) {
        Ok(file) => file,
        Err(e) => {
            log::error!("could not bootstrap CA cert: creating {} failed: {e}", path.display());
            return Status::Os(e);
        }
    };

    let pem = certs::to_pem(&candidate);
    if let Err(e) = file.write_all(pem.as_bytes()).and_then(|()| file.sync_all()) {
        log::error!("could not bootstrap CA cert: writing {} failed: {e}", path.display());
        drop(file);
        let _ = std::fs::remove_file(&path);
        return Status::Os(e);
    }
    drop(file);

    log::info!("successfully bootstrapped CA cert to {}", path.display());

    let ctx = TlsContext::global();
    ctx.add_client_ca_hint(candidate.clone());
    if let Err(e) = ctx.complete_bootstrap(&candidate) {
        log::error!("bootstrap: failed to install new trust store: {e}");
        return Status::Protocol(e.to_string());
    }

    log::info!("killing successful connection to retry using the bootstrapped CA cert");
    Status::Protocol("bootstrap complete; reconnect under the new trust anchor".into())
}
