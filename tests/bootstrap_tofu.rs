//! Trust-on-first-use CA bootstrap: first contact captures the peer's
//! self-signed root, and a reconnect under the new trust anchor succeeds.

mod support;

use std::time::{Duration, Instant};

use stream_ssl::{ActiveTlsStream, PassiveTlsListener, Phase, Status, TlsContext};

use support::{spin_until, unique_temp_path, write_file};

fn step_timeout() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[test]
fn first_contact_bootstraps_ca_and_reconnect_succeeds() {
    let chain = support::generate_test_chain("127.0.0.1");

    let key_path = unique_temp_path("key.pem");
    let chain_path = unique_temp_path("chain.pem");
    let ca_path = unique_temp_path("ca.pem");
    let mtls_trust_path = unique_temp_path("mtls-trust.pem");
    write_file(&key_path, &chain.leaf_key_pem);
    write_file(&chain_path, &chain.chain_pem);
    write_file(&mtls_trust_path, &chain.root_cert_pem);
    assert!(!ca_path.exists());

    let ctx = TlsContext::global();
    ctx.set_private_key_file(&key_path);
    ctx.set_certificate_chain_file(&chain_path);
    // The server side of this same process must be able to verify the
    // client's certificate (mandatory on every connection, bootstrap or
    // not); it's signed by the same root the client is about to bootstrap
    // trust *of the server* for, so it's loaded directly rather than
    // through the bootstrap path being exercised below.
    ctx.set_ca_cert_file(&mtls_trust_path, false);
    ctx.set_ca_cert_file(&ca_path, true);
    assert!(ctx.bootstrap_armed());

    let mut listener = PassiveTlsListener::open("0").expect("bind ephemeral listener");
    let port = listener.local_addr().expect("listener local_addr").port();

    let server = std::thread::spawn(move || {
        for _ in 0..2 {
            let deadline = step_timeout();
            let mut conn = spin_until(deadline, || match listener.accept() {
                Ok(stream) => Some(stream),
                Err(Status::TryAgain) => None,
                Err(e) => panic!("accept failed: {e}"),
            });
            let deadline = step_timeout();
            spin_until(deadline, || match conn.connect() {
                Status::Ready => Some(()),
                Status::TryAgain => None,
                other => panic!("server handshake failed: {other}"),
            });
        }
    });

    // First connection: bootstrap probe. Its own handshake succeeds at the
    // TLS layer, but `connect()` intercepts it before `Established` and
    // reports a protocol error instructing the caller to reconnect.
    let mut first = ActiveTlsStream::open(&format!("127.0.0.1:{port}")).expect("open first stream");
    let status = support::drive_connect(&mut first, step_timeout());
    assert!(matches!(status, Status::Protocol(_)), "expected bootstrap rejection, got {status:?}");
    assert_ne!(first.phase(), Phase::Established);
    drop(first);

    assert!(ca_path.exists(), "bootstrap should have written the captured root");
    assert!(!ctx.bootstrap_armed(), "bootstrap should disarm after the first capture");

    let captured = stream_ssl::certs::read_cert_chain(&ca_path).expect("read captured CA file");
    assert_eq!(captured.len(), 1);

    // Second connection: now verified normally against the captured root.
    let mut second = ActiveTlsStream::open(&format!("127.0.0.1:{port}")).expect("open second stream");
    let status = support::drive_connect(&mut second, step_timeout());
    assert!(matches!(status, Status::Ready), "expected Ready, got {status:?}");
    assert_eq!(second.phase(), Phase::Established);

    server.join().expect("server thread panicked");
}
