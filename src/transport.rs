//! TLS transport: connect, handshake, retry, request write.
//!
//! Opens one connection per request, performs the TOFU-verified handshake
//! and writes the single request line. Generic TLS failures are retried a
//! bounded number of times; trust decisions (mismatch, bad dates) and
//! timeouts are surfaced immediately.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::trust::{CertificateStore, TofuVerifier, TrustError};

/// Default Gemini port.
pub const DEFAULT_PORT: u16 = 1965;

/// Connection opener shared by all requests of one client.
#[derive(Clone)]
pub struct Transport {
    store: Arc<dyn CertificateStore>,
    limits: Limits,
}

impl Transport {
    pub fn new(store: Arc<dyn CertificateStore>, limits: Limits) -> Self {
        Self { store, limits }
    }

    /// Open a TLS connection for `address`, write the request line, and
    /// return the stream positioned at the start of the response header.
    ///
    /// Retries generic TLS failures up to `limits.max_attempts` total
    /// attempts with no backoff, surfacing the last error on exhaustion.
    /// Certificate mismatch and date failures are never retried.
    pub async fn open(&self, address: &str) -> Result<TlsStream<TcpStream>> {
        validate_request(address, self.limits.max_request_bytes)?;
        let (host, port) = parse_target(address)?;

        let mut last_error = None;
        for attempt in 1..=self.limits.max_attempts {
            match self.connect_once(address, &host, port).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable_tls() => {
                    tracing::warn!("TLS error on attempt {attempt}: {e}. Retrying ...");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!("All TLS retries failed for {address}");
        Err(last_error.unwrap_or_else(|| Error::invalid_response("unknown TLS failure after retries")))
    }

    async fn connect_once(&self, address: &str, host: &str, port: u16) -> Result<TlsStream<TcpStream>> {
        let timed_out = || Error::NoResponse(format!("Request timed out: {address}"));

        let tcp = match timeout(self.limits.request_timeout, connect_tcp(address, host, port)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(timed_out()),
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::InvalidUri(format!("Illegal URI: {address} (bad host name)")))?;
        let verifier = Arc::new(TofuVerifier::new(host, self.store.clone()));
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let mut tls = match timeout(self.limits.request_timeout, connector.connect(server_name, tcp)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(map_tls_error(e)),
            Err(_) => return Err(timed_out()),
        };

        tls.write_all(address.as_bytes()).await?;
        tls.write_all(b"\r\n").await?;
        tls.flush().await?;
        Ok(tls)
    }
}

/// Extract host and port from a request URI. Default port is 1965.
fn parse_target(address: &str) -> Result<(String, u16)> {
    let url = Url::parse(address).map_err(|_| Error::InvalidUri(format!("Illegal URI: {address}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUri(format!("No host in URI: {address}")))?
        .to_string();
    Ok((host, url.port().unwrap_or(DEFAULT_PORT)))
}

/// Reject oversized or BOM-prefixed request strings before any I/O.
fn validate_request(address: &str, max_bytes: usize) -> Result<()> {
    let bytes = address.as_bytes();

    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Err(Error::invalid_uri("URI must not begin with a UTF-8 BOM (U+FEFF)"));
    }

    if bytes.len() > max_bytes {
        return Err(Error::InvalidUri(format!(
            "URI exceeds {max_bytes}-byte limit when UTF-8 encoded"
        )));
    }

    Ok(())
}

/// Resolve the host and connect to the first reachable address.
///
/// Resolution failure (or a name with no addresses) is a URI problem; once
/// addresses exist, every connect failure is a transport problem.
async fn connect_tcp(address: &str, host: &str, port: u16) -> Result<TcpStream> {
    let unknown_host = || Error::InvalidUri(format!("Illegal URI: {address} (unknown host)"));

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|_| unknown_host())?
        .collect();
    if addrs.is_empty() {
        return Err(unknown_host());
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    // Non-empty addrs, so at least one connect ran and failed.
    let err = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused));
    Err(map_connect_error(err, address))
}

fn map_connect_error(err: io::Error, address: &str) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            Error::NoResponse(format!("Server did not accept connection: {address}"))
        }
        io::ErrorKind::TimedOut => Error::NoResponse(format!("Request timed out: {address}")),
        _ => Error::NoResponse(format!("Could not connect: {address} ({err})")),
    }
}

/// Map a handshake failure, unwrapping trust-verifier decisions smuggled
/// through `rustls::Error::Other` so they are distinguishable from generic
/// TLS failures (and excluded from the retry loop).
fn map_tls_error(err: io::Error) -> Error {
    if let Some(inner) = err.get_ref() {
        if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
            if let rustls::Error::Other(other) = tls {
                if let Some(trust) = other.0.downcast_ref::<TrustError>() {
                    return match trust {
                        TrustError::Mismatch { host, fingerprint } => Error::CertificateMismatch {
                            host: host.clone(),
                            fingerprint: fingerprint.clone(),
                        },
                        TrustError::BadDate => Error::CertificateDate,
                    };
                }
            }
            return Error::Tls(tls.to_string());
        }
    }

    if err.kind() == io::ErrorKind::TimedOut {
        return Error::no_response("request timed out during TLS handshake");
    }

    Error::Tls(err.to_string())
}
