//! PEM certificate file reading and the self-signed check used by the CA
//! bootstrap controller.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use rustls::pki_types::CertificateDer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertFileError {
    #[error("failed to open `{path}`: {source}")]
    Open { path: String, #[source] source: io::Error },
    #[error("failed to parse PEM certificate in `{path}`: {source}")]
    Parse { path: String, #[source] source: io::Error },
}

/// Iteratively parses every PEM-encoded certificate in `path`, skipping
/// whitespace between blocks, stopping at end of file.
///
/// On any parse error all previously parsed certificates are dropped and an
/// [`CertFileError`] is returned — there is no partial result.
pub fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertFileError> {
    let file = File::open(path).map_err(|source| CertFileError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let certs: Result<Vec<_>, io::Error> = rustls_pemfile::certs(&mut reader).collect();
    certs.map_err(|source| CertFileError::Parse { path: path.display().to_string(), source })
}

/// Errors from [`is_self_signed`].
#[derive(Debug, Error)]
pub enum SelfSignedCheckError {
    #[error("could not parse candidate root as X.509: {0}")]
    Malformed(String),
}

/// True if `cert`'s issuer equals its subject (by DER encoding, not just the
/// rendered name) and the certificate validates against its own public key.
///
/// Used to decide whether a candidate bootstrapped root is trustworthy at
/// all: a CA capture that accepted any leaf certificate the peer felt like
/// sending would defeat trust-on-first-use entirely.
pub fn is_self_signed(cert: &CertificateDer<'_>) -> Result<bool, SelfSignedCheckError> {
    use x509_parser::prelude::{FromDer, X509Certificate};

    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| SelfSignedCheckError::Malformed(e.to_string()))?;

    if parsed.issuer().as_raw() != parsed.subject().as_raw() {
        return Ok(false);
    }

    Ok(parsed.verify_signature(None).is_ok())
}

#[cfg(feature = "mtls")]
/// Common certificate fields pulled out of a peer certificate, for
/// diagnostics and logging once a client certificate has been verified.
pub struct CertificateFields {
    pub common_names: Vec<String>,
    pub organisation_units: Vec<String>,
}

/// Renders a single DER certificate as a PEM block (`-----BEGIN
/// CERTIFICATE-----`, base64 body wrapped at 64 columns, `-----END
/// CERTIFICATE-----`), the form the bootstrap controller persists to disk.
pub fn to_pem(cert: &CertificateDer<'_>) -> String {
    use base64::Engine;

    let body = base64::engine::general_purpose::STANDARD.encode(cert.as_ref());
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 64);
    out.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(line).expect("base64 output is ASCII"));
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

#[cfg(feature = "mtls")]
pub fn parse_fields(cert: &CertificateDer<'_>) -> Result<CertificateFields, SelfSignedCheckError> {
    use x509_parser::prelude::{FromDer, X509Certificate};

    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| SelfSignedCheckError::Malformed(e.to_string()))?;

    let subject = parsed.subject();
    let common_names = subject
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .collect();
    let organisation_units = subject
        .iter_organizational_unit()
        .filter_map(|ou| ou.as_str().ok())
        .map(str::to_owned)
        .collect();

    Ok(CertificateFields { common_names, organisation_units })
}
