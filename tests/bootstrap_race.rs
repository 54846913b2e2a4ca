//! Two connections opened while bootstrap is armed: whichever completes its
//! handshake first wins and installs the trust anchor, and the other
//! (having itself been opened with verification disabled) must be rejected
//! once it finishes, rather than silently trusted.

mod support;

use std::time::{Duration, Instant};

use stream_ssl::{ActiveTlsStream, PassiveTlsListener, Status, TlsContext};

use support::{spin_until, unique_temp_path, write_file};

fn step_timeout() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[test]
fn race_loser_is_rejected_after_winner_disarms_bootstrap() {
    let chain = support::generate_test_chain("127.0.0.1");

    let key_path = unique_temp_path("key.pem");
    let chain_path = unique_temp_path("chain.pem");
    let ca_path = unique_temp_path("ca.pem");
    let mtls_trust_path = unique_temp_path("mtls-trust.pem");
    write_file(&key_path, &chain.leaf_key_pem);
    write_file(&chain_path, &chain.chain_pem);
    write_file(&mtls_trust_path, &chain.root_cert_pem);

    let ctx = TlsContext::global();
    ctx.set_private_key_file(&key_path);
    ctx.set_certificate_chain_file(&chain_path);
    // Needed so the server side can verify both connections' client
    // certificates, which is mandatory regardless of bootstrap state.
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

    // Both streams are opened while bootstrap is still armed, so both
    // snapshot `used_relaxed_verifier = true` regardless of which one's
    // handshake actually finishes first.
    let mut winner = ActiveTlsStream::open(&format!("127.0.0.1:{port}")).expect("open winner stream");
    let mut loser = ActiveTlsStream::open(&format!("127.0.0.1:{port}")).expect("open loser stream");

    let winner_status = support::drive_connect(&mut winner, step_timeout());
    assert!(matches!(winner_status, Status::Protocol(_)), "winner should report the reconnect signal, got {winner_status:?}");
    assert!(!ctx.bootstrap_armed(), "the winner should have disarmed bootstrap");
    drop(winner);

    let loser_status = support::drive_connect(&mut loser, step_timeout());
    match loser_status {
        Status::Protocol(msg) => {
            assert!(msg.contains("outside an active bootstrap window"), "expected a race-window rejection, got: {msg}");
        }
        other => panic!("expected the loser to be rejected, got {other:?}"),
    }

    server.join().expect("server thread panicked");
}
