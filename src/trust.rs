//! Trust-on-first-use certificate verification.
//!
//! There is no CA in Gemini's trust model: the first certificate a host
//! presents is pinned, and every later handshake must present the same
//! fingerprint or fail with a mismatch the caller can act on. Expiry is
//! checked before any trust lookup, and a mismatch never resolves itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use x509_parser::parse_x509_certificate;

/// Certificate store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No fingerprint pinned for the host.
    #[error("no certificate for host")]
    NotFound,

    /// Host already has a pinned fingerprint; use `replace` to change it.
    #[error("host already has a certificate")]
    Duplicate,

    /// Backend failure (I/O, database, ...).
    #[error("certificate store error: {0}")]
    Storage(String),
}

/// Per-host fingerprint persistence consumed by the verifier.
///
/// `insert` must be insert-if-absent: two concurrent first contacts for the
/// same host may both observe `NotFound`, and exactly one insert may win.
/// The verifier resolves the loser by re-reading.
pub trait CertificateStore: Send + Sync {
    /// Pinned fingerprint and the time it was first observed.
    fn lookup(&self, host: &str) -> Result<(String, SystemTime), StoreError>;

    /// Pin a fingerprint for a host with no existing record.
    fn insert(&self, host: &str, fingerprint: &str) -> Result<(), StoreError>;

    /// Overwrite a pinned fingerprint. This is the explicit user-approved
    /// "trust the new certificate" action.
    fn replace(&self, host: &str, fingerprint: &str) -> Result<(), StoreError>;

    /// Drop all pinned fingerprints.
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory certificate store.
///
/// The mutex serializes the check-insert sequence, so concurrent first
/// contacts for one host cannot both pin.
#[derive(Clone, Debug, Default)]
pub struct MemoryCertificateStore {
    entries: Arc<Mutex<HashMap<String, (String, SystemTime)>>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn lookup(&self, host: &str) -> Result<(String, SystemTime), StoreError> {
        let entries = self.entries.lock().expect("certificate store mutex poisoned");
        entries.get(host).cloned().ok_or(StoreError::NotFound)
    }

    fn insert(&self, host: &str, fingerprint: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("certificate store mutex poisoned");
        if entries.contains_key(host) {
            return Err(StoreError::Duplicate);
        }
        entries.insert(host.to_string(), (fingerprint.to_string(), SystemTime::now()));
        Ok(())
    }

    fn replace(&self, host: &str, fingerprint: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("certificate store mutex poisoned");
        entries.insert(host.to_string(), (fingerprint.to_string(), SystemTime::now()));
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("certificate store mutex poisoned");
        entries.clear();
        Ok(())
    }
}

/// Typed verifier failures smuggled through the handshake as
/// `rustls::Error::Other`, so the transport can tell a trust decision from
/// a generic TLS failure.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TrustError {
    #[error("certificate fingerprint mismatch for {host}")]
    Mismatch { host: String, fingerprint: String },

    #[error("certificate expired or not yet valid")]
    BadDate,
}

/// Lowercase hex SHA-256 over a DER-encoded certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// TOFU server certificate verifier for one connection.
///
/// Only the leaf certificate matters; the chain is ignored. Validity dates
/// are checked before the store is consulted.
pub struct TofuVerifier {
    host: String,
    store: Arc<dyn CertificateStore>,
}

impl TofuVerifier {
    pub fn new(host: impl Into<String>, store: Arc<dyn CertificateStore>) -> Self {
        Self {
            host: host.into(),
            store,
        }
    }

    fn check(&self, end_entity: &CertificateDer<'_>, now: UnixTime) -> Result<(), rustls::Error> {
        let (_, cert) = parse_x509_certificate(end_entity.as_ref())
            .map_err(|_| rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding))?;

        let now = now.as_secs() as i64;
        let validity = cert.validity();
        if now < validity.not_before.timestamp() || now > validity.not_after.timestamp() {
            return Err(other_error(TrustError::BadDate));
        }

        let fingerprint = fingerprint(end_entity.as_ref());
        match self.store.lookup(&self.host) {
            Ok((pinned, _)) => self.compare(&pinned, fingerprint),
            Err(StoreError::NotFound) => match self.store.insert(&self.host, &fingerprint) {
                Ok(()) => {
                    tracing::info!("Pinned new certificate for {}", self.host);
                    Ok(())
                }
                // Lost a first-contact race; whoever won pinned for us.
                Err(StoreError::Duplicate) => match self.store.lookup(&self.host) {
                    Ok((pinned, _)) => self.compare(&pinned, fingerprint),
                    Err(e) => Err(other_error(e)),
                },
                Err(e) => Err(other_error(e)),
            },
            Err(e) => Err(other_error(e)),
        }
    }

    fn compare(&self, pinned: &str, fingerprint: String) -> Result<(), rustls::Error> {
        if pinned == fingerprint {
            Ok(())
        } else {
            Err(other_error(TrustError::Mismatch {
                host: self.host.clone(),
                fingerprint,
            }))
        }
    }
}

fn other_error(err: impl std::error::Error + Send + Sync + 'static) -> rustls::Error {
    rustls::Error::Other(rustls::OtherError(Arc::new(err)))
}

impl fmt::Debug for TofuVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TofuVerifier").field("host", &self.host).finish()
    }
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity, now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
