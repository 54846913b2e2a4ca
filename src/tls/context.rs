//! Process-wide TLS configuration.
//!
//! A single [`TlsContext`] backs every stream this crate ever opens. It is
//! built up by a handful of non-failing setters — called once, at startup,
//! before any stream exists — and is otherwise read (and, during CA
//! bootstrap, rewritten in place) from the connection-handling path.
//!
//! This mirrors the global `SSL_CTX` a classic OpenSSL-based stream
//! implementation keeps: one context, configured by discrete setter calls
//! with no object to construct and no context argument threaded through
//! every call site. See [`crate::tls::bootstrap`] for the one place besides
//! the setters that mutates it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::certs;
use crate::rate_limit::NamedLimiter;

/// Ephemeral Diffie-Hellman key lengths the original OpenSSL-based design
/// precomputed parameters for. rustls negotiates its own key-exchange
/// groups and has no equivalent callback to feed custom DH parameters into,
/// so this table is kept only as a configuration-validation surface: it
/// lets [`TlsContext::dh_param_keylength_supported`] reject (and
/// rate-limit-log) an unknown length the way the original's callback did,
/// without any live handshake code path depending on it.
const SUPPORTED_DH_KEY_LENGTHS: [u32; 3] = [1024, 2048, 4096];

struct Inner {
    private_key: Option<PrivateKeyDer<'static>>,
    local_cert_chain: Vec<CertificateDer<'static>>,
    /// Certificates appended after our own chain when presenting ourselves
    /// to a peer, loaded by the peer-CA-hint setter. Typically the CA cert
    /// itself, so that a peer bootstrapping trust against us can pick it up
    /// straight out of our handshake's certificate message.
    extra_chain_certs: Vec<CertificateDer<'static>>,
    trusted_roots: RootCertStore,

    has_private_key: bool,
    has_certificate: bool,
    has_ca_cert: bool,

    bootstrap_armed: bool,
    bootstrap_path: Option<PathBuf>,

    dh_warn: NamedLimiter,
}

impl Inner {
    fn new() -> Self {
        Inner {
            private_key: None,
            local_cert_chain: Vec::new(),
            extra_chain_certs: Vec::new(),
            trusted_roots: RootCertStore::empty(),
            has_private_key: false,
            has_certificate: false,
            has_ca_cert: false,
            bootstrap_armed: false,
            bootstrap_path: None,
            dh_warn: NamedLimiter::new(),
        }
    }
}

/// Handle to the process-wide TLS configuration. Cloning is cheap — it's a
/// pointer to the same lazily-initialized singleton.
#[derive(Clone, Copy)]
pub struct TlsContext;

static CONTEXT: OnceLock<RwLock<Inner>> = OnceLock::new();

fn inner() -> &'static RwLock<Inner> {
    CONTEXT.get_or_init(|| RwLock::new(Inner::new()))
}

/// Why [`TlsContext::new_stream_precondition`] refused to let a stream open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDefect {
    MissingPrivateKey,
    MissingCertificate,
    MissingTrustAnchor,
    KeyCertMismatch,
}

impl TlsContext {
    pub fn global() -> Self {
        TlsContext
    }

    /// "Is TLS at least partially configured?" — true as soon as any one of
    /// the essential attributes has been set.
    pub fn is_configured(&self) -> bool {
        let inner = inner().read();
        inner.has_private_key || inner.has_certificate || inner.has_ca_cert
    }

    /// Loads a PEM private key. Non-failing: a malformed file is logged and
    /// `has_private_key` is left unset, so a later `new_stream` refuses to
    /// open with [`ConfigDefect::MissingPrivateKey`] rather than this call
    /// returning an error nobody is positioned to handle.
    pub fn set_private_key_file(&self, path: &Path) {
        let key = match std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                rustls_pemfile::private_key(&mut bytes.as_slice())
                    .map_err(|e| e.to_string())
                    .and_then(|k| k.ok_or_else(|| "no private key found in file".to_string()))
            }) {
            Ok(key) => key,
            Err(e) => {
                log::error!("failed to load private key from {}: {e}", path.display());
                return;
            }
        };

        let mut inner = inner().write();
        inner.private_key = Some(key);
        inner.has_private_key = true;
    }

    /// Loads a PEM certificate chain to present as our own identity.
    pub fn set_certificate_chain_file(&self, path: &Path) {
        let chain = match certs::read_cert_chain(path) {
            Ok(chain) if !chain.is_empty() => chain,
            Ok(_) => {
                log::error!("certificate file {} contained no certificates", path.display());
                return;
            }
            Err(e) => {
                log::error!("failed to load certificate chain from {}: {e}", path.display());
                return;
            }
        };

        let mut inner = inner().write();
        inner.local_cert_chain = chain;
        inner.has_certificate = true;
    }

    /// Loads certificates to append to our own chain when presenting
    /// ourselves to a peer — typically so a peer bootstrapping trust
    /// against us can recover our CA certificate from the handshake.
    pub fn set_peer_ca_hint_file(&self, path: &Path) {
        let certs = match certs::read_cert_chain(path) {
            Ok(certs) => certs,
            Err(e) => {
                log::error!("failed to load peer CA hint file {}: {e}", path.display());
                return;
            }
        };

        inner().write().extra_chain_certs = certs;
    }

    /// Dual-behavior trusted-CA setter. If `bootstrap` is set and
    /// `path` does not exist yet, arms bootstrap mode instead of failing:
    /// the CA will be captured from the first peer we connect to. Otherwise
    /// the file is parsed and loaded into the trust store.
    pub fn set_ca_cert_file(&self, path: &Path, bootstrap: bool) {
        if bootstrap && !path.exists() {
            let mut inner = inner().write();
            inner.bootstrap_armed = true;
            inner.bootstrap_path = Some(path.to_path_buf());
            return;
        }

        let chain = match certs::read_cert_chain(path) {
            Ok(chain) => chain,
            Err(e) => {
                log::error!("failed to load CA certificate file {}: {e}", path.display());
                return;
            }
        };

        let mut roots = RootCertStore::empty();
        let mut loaded = 0;
        for cert in &chain {
            if roots.add(cert.clone()).is_err() {
                log::error!("failed to add a certificate from {} to the trust store", path.display());
                continue;
            }
            loaded += 1;
        }
        if loaded == 0 {
            log::error!("CA certificate file {} contained no usable certificates", path.display());
            return;
        }

        let mut inner = inner().write();
        inner.trusted_roots = roots;
        inner.has_ca_cert = true;
    }

    /// True if `key_length` is one this crate recognizes. Unrecognized
    /// lengths are logged once, rate-limited, exactly as the original
    /// DH-parameter callback warned on an unknown key length.
    pub fn dh_param_keylength_supported(&self, key_length: u32) -> bool {
        if SUPPORTED_DH_KEY_LENGTHS.contains(&key_length) {
            return true;
        }
        if inner().write().dh_warn.allow() {
            log::warn!("no Diffie-Hellman parameters for key length {key_length}");
        }
        false
    }

    /// Appends a certificate to the client-CA hint list presented during
    /// the server handshake. Used by the bootstrap controller to advertise
    /// the just-captured root the same way [`Self::set_peer_ca_hint_file`]
    /// would have, had it been configured with the file up front.
    pub fn add_client_ca_hint(&self, cert: CertificateDer<'static>) {
        inner().write().extra_chain_certs.push(cert);
    }

    pub fn bootstrap_armed(&self) -> bool {
        inner().read().bootstrap_armed
    }

    pub fn bootstrap_path(&self) -> Option<PathBuf> {
        inner().read().bootstrap_path.clone()
    }

    /// Checks the three-way precondition every `new_stream` must satisfy:
    /// private key, local certificate, and (trust anchor or armed
    /// bootstrap) must all be present, and the key must match the cert.
    pub fn new_stream_precondition(&self) -> Result<(), ConfigDefect> {
        let inner = inner().read();
        if !inner.has_private_key {
            return Err(ConfigDefect::MissingPrivateKey);
        }
        if !inner.has_certificate {
            return Err(ConfigDefect::MissingCertificate);
        }
        if !inner.has_ca_cert && !inner.bootstrap_armed {
            return Err(ConfigDefect::MissingTrustAnchor);
        }
        drop(inner);
        if !self.key_matches_certificate() {
            return Err(ConfigDefect::KeyCertMismatch);
        }
        Ok(())
    }

    /// Checks that the configured private key actually corresponds to the
    /// leaf certificate's public key, not merely that both use the same
    /// signature algorithm family (two unrelated RSA keys would otherwise
    /// pass). Delegates to rustls's own `CertifiedKey::keys_match`, its
    /// equivalent of `SSL_CTX_check_private_key`.
    fn key_matches_certificate(&self) -> bool {
        let inner = inner().read();
        let (Some(key), Some(leaf)) = (inner.private_key.as_ref(), inner.local_cert_chain.first()) else {
            return false;
        };
        let Ok(signing_key) = rustls::crypto::ring::sign::any_supported_type(key) else {
            return false;
        };
        let certified = rustls::sign::CertifiedKey::new(vec![leaf.clone()], signing_key);
        certified.keys_match().is_ok()
    }

    /// The certificate chain we present to a peer: our configured chain
    /// plus any extra hint certificates, in that order.
    fn presented_chain(&self) -> Vec<CertificateDer<'static>> {
        let inner = inner().read();
        let mut chain = inner.local_cert_chain.clone();
        chain.extend(inner.extra_chain_certs.iter().cloned());
        chain
    }

    fn certified_key(&self) -> Result<Arc<rustls::sign::CertifiedKey>, rustls::Error> {
        let inner = inner().read();
        let key = inner.private_key.as_ref().expect("precondition checked").clone_key();
        drop(inner);

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;
        Ok(Arc::new(rustls::sign::CertifiedKey::new(self.presented_chain(), signing_key)))
    }

    /// A normal, verifying client config: used for every client connection
    /// except the one bootstrap probe.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        let roots = inner().read().trusted_roots.clone();
        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);
        self.finish_client_config(builder)
    }

    /// A client config with server-certificate verification disabled,
    /// used only for the single handshake that captures a bootstrap root.
    pub fn relaxed_client_config(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        use rustls::client::danger::ServerCertVerifier;

        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .dangerous();
        let verifier: Arc<dyn ServerCertVerifier> = Arc::new(super::verifier::NoServerVerification);
        // `with_custom_certificate_verifier` lands back in the same
        // `WantsClientCert` builder stage `with_root_certificates` does, so
        // the probe still presents our own identity the way any other
        // connection would — bootstrap only relaxes verification of the
        // peer's certificate, not our own.
        let builder = builder.with_custom_certificate_verifier(verifier);
        self.finish_client_config(builder)
    }

    fn finish_client_config(
        &self,
        builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsClientCert>,
    ) -> Result<Arc<ClientConfig>, rustls::Error> {
        let config = if self.has_client_identity() {
            builder.with_client_auth_cert(self.presented_chain(), self.private_key_clone())?
        } else {
            builder.with_no_client_auth()
        };
        Ok(Arc::new(config))
    }

    fn has_client_identity(&self) -> bool {
        let inner = inner().read();
        inner.has_private_key && inner.has_certificate
    }

    fn private_key_clone(&self) -> PrivateKeyDer<'static> {
        inner().read().private_key.as_ref().expect("checked by has_client_identity").clone_key()
    }

    /// A server config. Requires and verifies a client certificate against
    /// the trust store on every connection, matching the single process-wide
    /// `SSL_CTX_set_verify(ctx, SSL_VERIFY_PEER | SSL_VERIFY_FAIL_IF_NO_PEER_CERT, ...)`
    /// the original sets once and applies to both roles: this crate has no
    /// build-time toggle for it.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, rustls::Error> {
        let verifier = self.client_cert_verifier()?;
        let builder = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier);

        let key = rustls::crypto::ring::sign::any_supported_type(&self.private_key_clone())?;
        let resolver = Arc::new(StaticCertResolver(Arc::new(
            rustls::sign::CertifiedKey::new(self.presented_chain(), key),
        )));
        Ok(Arc::new(builder.with_cert_resolver(resolver)))
    }

    fn client_cert_verifier(&self) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, rustls::Error> {
        let roots = Arc::new(inner().read().trusted_roots.clone());
        rustls::server::WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))
    }

    /// Completes bootstrap: swaps the trust store for one containing only
    /// `cert`, and flips the flags atomically under one write lock so no
    /// reader ever observes both set or both unset.
    pub fn complete_bootstrap(&self, cert: &CertificateDer<'static>) -> Result<(), rustls::Error> {
        let mut roots = RootCertStore::empty();
        roots.add(cert.clone()).map_err(|e| rustls::Error::General(e.to_string()))?;

        let mut inner = inner().write();
        inner.trusted_roots = roots;
        inner.bootstrap_armed = false;
        inner.has_ca_cert = true;
        Ok(())
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

#[derive(Debug)]
struct StaticCertResolver(Arc<rustls::sign::CertifiedKey>);

impl rustls::client::ResolvesClientCert for StaticCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sig_schemes: &[rustls::SignatureScheme],
    ) -> Option<Arc<rustls::sign::CertifiedKey>> {
        Some(self.0.clone())
    }

    fn has_certs(&self) -> bool {
        true
    }
}

impl rustls::server::ResolvesServerCert for StaticCertResolver {
    fn resolve(&self, _client_hello: rustls::server::ClientHello<'_>) -> Option<Arc<rustls::sign::CertifiedKey>> {
        Some(self.0.clone())
    }
}
