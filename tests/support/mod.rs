//! Minimal reference poll loop used only by this crate's own integration
//! tests, to exercise `ActiveTlsStream`/`PassiveTlsListener` the way a
//! real host framework would: repeated `connect`/`run`/`recv`/`send`
//! calls interleaved with `mio::Poll::poll`. Not part of the crate's
//! public contract.

use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use stream_ssl::wait::Registrar;
use stream_ssl::{ActiveTlsStream, Status, Want, WaitKind};

const TOKEN: Token = Token(0);
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Records the single wait a `wait()`/`run_wait()` call asked for.
#[derive(Default)]
pub struct RecordingRegistrar {
    pub want: Option<Want>,
    pub immediate: bool,
}

impl Registrar for RecordingRegistrar {
    fn wait_for(&mut self, _fd: RawFd, direction: Want) {
        self.want = Some(direction);
    }

    fn wake_immediately(&mut self) {
        self.immediate = true;
    }
}

/// What a single `step` in [`drive`] learned after a failed attempt: either
/// it can be retried without waiting, or it needs to wait for a direction
/// on the fd before trying again.
pub enum Next {
    Immediate,
    WaitFor(Want),
}

/// Calls `step` in a loop, backed by a real `mio::Poll` registered on `fd`,
/// until it returns `Some`. Each call is expected to attempt the operation
/// and, on failure, consult `stream.wait(...)` / `listener.wait(...)`
/// itself and report the result as [`Next`] — kept to one closure (rather
/// than a separate attempt/wait pair) so it only needs one mutable borrow
/// of whatever it's driving.
pub fn drive<T>(fd: RawFd, deadline: Instant, mut step: impl FnMut() -> (Option<T>, Next)) -> T {
    let mut poll = Poll::new().expect("mio::Poll::new");
    let mut events = Events::with_capacity(4);
    let mut registered_for: Option<Interest> = None;

    loop {
        let (result, next) = step();
        if let Some(value) = result {
            return value;
        }

        if Instant::now() >= deadline {
            panic!("drive() timed out waiting for progress");
        }

        let want = match next {
            Next::Immediate => continue,
            Next::WaitFor(want) => want,
        };
        let interest = stream_ssl::wait::want_to_interest(want).unwrap_or(Interest::READABLE);

        let mut source = SourceFd(&fd);
        match registered_for {
            Some(prev) if prev == interest => {}
            Some(_) => {
                poll.registry().reregister(&mut source, TOKEN, interest).expect("reregister");
                registered_for = Some(interest);
            }
            None => {
                poll.registry().register(&mut source, TOKEN, interest).expect("register");
                registered_for = Some(interest);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        poll.poll(&mut events, Some(remaining.min(STEP_TIMEOUT))).expect("poll");
    }
}

/// Runs a [`Registrar`]-driven operation and reduces it to a [`Next`] for
/// [`drive`]: `register` is called with a fresh [`RecordingRegistrar`] and
/// its outcome translated directly.
pub fn next_from_wait(register: impl FnOnce(&mut RecordingRegistrar)) -> Next {
    let mut registrar = RecordingRegistrar::default();
    register(&mut registrar);
    match registrar.want {
        Some(want) if !registrar.immediate => Next::WaitFor(want),
        _ => Next::Immediate,
    }
}

/// Busy-polls `attempt` until it returns `Some`, sleeping briefly between
/// tries. Used on background "peer" threads in these tests where running
/// a second `mio::Poll` alongside the one in [`drive`] would just add
/// noise; the module under test never knows or cares how its caller waits.
pub fn spin_until<T>(deadline: Instant, mut attempt: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(value) = attempt() {
            return value;
        }
        if Instant::now() >= deadline {
            panic!("spin_until() timed out waiting for progress");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Drives `client.connect()` to its terminal, non-`TryAgain` status —
/// `Ready` on a normal handshake, or whatever rejection status a bootstrap
/// probe reports. Callers that expect success should assert on the
/// returned status themselves rather than this helper panicking for them.
pub fn drive_connect(client: &mut ActiveTlsStream, deadline: Instant) -> Status {
    let fd = client.as_raw_fd();
    drive(fd, deadline, || match client.connect() {
        Status::TryAgain => {
            let next = next_from_wait(|r| client.wait(WaitKind::Connect, r));
            (None, next)
        }
        other => (Some(other), Next::Immediate),
    })
}

/// A unique path under the OS temp directory for bootstrap-file tests.
pub fn unique_temp_path(label: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("stream-ssl-test-{}-{}-{}", std::process::id(), label, n))
}

/// Generates a self-signed root plus a leaf certificate signed by it,
/// returning (leaf_cert_pem, leaf_key_pem, chain_pem, root_cert_pem).
pub struct TestChain {
    pub leaf_cert_pem: String,
    pub leaf_key_pem: String,
    pub chain_pem: String,
    pub root_cert_pem: String,
}

pub fn generate_test_chain(common_name: &str) -> TestChain {
    let mut root_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    root_params.distinguished_name.push(rcgen::DnType::CommonName, format!("{common_name} root"));
    root_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let root_key = rcgen::KeyPair::generate().unwrap();
    let root_cert = root_params.self_signed(&root_key).unwrap();

    let mut leaf_params = rcgen::CertificateParams::new(vec![common_name.to_string()]).unwrap();
    leaf_params.distinguished_name.push(rcgen::DnType::CommonName, common_name.to_string());
    let leaf_key = rcgen::KeyPair::generate().unwrap();
    let leaf_cert = leaf_params.signed_by(&leaf_key, &root_cert, &root_key).unwrap();

    let chain_pem = format!("{}\n{}", leaf_cert.pem(), root_cert.pem());

    TestChain {
        leaf_cert_pem: leaf_cert.pem(),
        leaf_key_pem: leaf_key.serialize_pem(),
        chain_pem,
        root_cert_pem: root_cert.pem(),
    }
}

pub fn write_file(path: &std::path::Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}
