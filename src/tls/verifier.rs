//! A server-certificate verifier that accepts anything, used only for the
//! single handshake that probes a peer's root during CA bootstrap.
//!
//! Bootstrap mode is, by construction, the one place this crate is allowed
//! to skip verification: there is nothing yet to verify against. Every
//! other client connection goes through rustls's ordinary
//! [`rustls::client::WebPkiServerVerifier`].

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error, SignatureScheme};

#[derive(Debug)]
pub(crate) struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // Every scheme rustls's ring provider knows how to check; bootstrap
        // mode must accept whatever the peer offers to capture its root.
        use SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA1, ECDSA_SHA1_Legacy,
            RSA_PKCS1_SHA256, ECDSA_NISTP256_SHA256,
            RSA_PKCS1_SHA384, ECDSA_NISTP384_SHA384,
            RSA_PKCS1_SHA512, ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256, RSA_PSS_SHA384, RSA_PSS_SHA512,
            ED25519, ED448,
        ]
    }
}
