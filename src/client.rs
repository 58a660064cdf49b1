//! Client facade: fetch-as-text and fetch-as-bytes.
//!
//! `get` follows redirects up to the hop limit; `binary` does not follow
//! anything and fails on every non-success status. Redirect state is local
//! to each call, so one client can serve independent requests.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::protocol::{self, Status};
use crate::transport::Transport;
use crate::trust::CertificateStore;

/// The exposed client contract: fetch a document as text (with optional
/// cache consultation) or as raw bytes.
///
/// The plain [`GeminiClient`] ignores `check_cache`; the caching decorator
/// honors it.
pub trait Fetch {
    fn get(&self, uri: &str, check_cache: bool) -> impl std::future::Future<Output = Result<String>> + Send;
    fn binary(&self, uri: &str) -> impl std::future::Future<Output = Result<Bytes>> + Send;
}

/// Outcome of one text fetch before redirect resolution.
enum TextOutcome {
    Text(String),
    Redirect(String),
}

/// Gemini client over a TOFU-verified TLS transport.
pub struct GeminiClient {
    transport: Transport,
    limits: Limits,
}

impl GeminiClient {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self::with_limits(store, Limits::default())
    }

    pub fn with_limits(store: Arc<dyn CertificateStore>, limits: Limits) -> Self {
        Self {
            transport: Transport::new(store, limits.clone()),
            limits,
        }
    }

    /// One request/response round trip for `get`, bounded by the request
    /// timeout. Redirects are reported, not followed, so the caller can
    /// count hops.
    async fn fetch_text(&self, uri: &str) -> Result<TextOutcome> {
        let round_trip = async {
            let stream = self.transport.open(uri).await?;
            let mut input = BufReader::new(stream);
            let (status, meta) = protocol::read_header(&mut input, self.limits.max_header_bytes).await?;

            match protocol::classify(status) {
                Status::Input => Err(Error::InputRequired {
                    uri: uri.to_string(),
                    meta,
                }),
                Status::SensitiveInput => Err(Error::SensitiveInputRequired {
                    uri: uri.to_string(),
                    meta,
                }),
                Status::Redirect => Ok(TextOutcome::Redirect(meta)),
                Status::Refused => Err(Error::RequestRefused(meta)),
                Status::Failure => {
                    tracing::debug!("Server responded with non-success: {status}");
                    Err(Error::InvalidResponse(format!(
                        "Server responded with non-success: {status}"
                    )))
                }
                Status::Success => {
                    let text =
                        protocol::read_limited_text(&mut input, self.limits.max_body_bytes).await?;
                    Ok(TextOutcome::Text(text))
                }
            }
        };

        match timeout(self.limits.request_timeout, round_trip).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::NoResponse(format!("Request timed out: {uri}"))),
        }
    }
}

impl Fetch for GeminiClient {
    async fn get(&self, uri: &str, check_cache: bool) -> Result<String> {
        tracing::info!("GET: {uri}, check_cache: {check_cache}");

        let mut target = uri.to_string();
        let mut hops = 0u32;

        loop {
            match self.fetch_text(&target).await? {
                TextOutcome::Text(text) => return Ok(text),
                TextOutcome::Redirect(next) => {
                    tracing::info!("REDIRECT: {next}, count: {hops}");
                    hops += 1;
                    if hops > self.limits.max_redirects {
                        return Err(Error::TooManyRedirects(format!(
                            "Tried too many redirects: {next}"
                        )));
                    }
                    target = next;
                }
            }
        }
    }

    async fn binary(&self, uri: &str) -> Result<Bytes> {
        let round_trip = async {
            let stream = self.transport.open(uri).await?;
            let mut input = BufReader::new(stream);
            let (status, meta) = protocol::read_header(&mut input, self.limits.max_header_bytes).await?;

            if !matches!(protocol::classify(status), Status::Success) {
                tracing::debug!("Server responded with non-success: {status}");
                return Err(Error::InvalidResponse(format!(
                    "Cannot download: server responded with status {status} ({meta})"
                )));
            }

            protocol::read_limited_bytes(&mut input, self.limits.max_body_bytes).await
        };

        match timeout(self.limits.request_timeout, round_trip).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::NoResponse(format!("Request timed out: {uri}"))),
        }
    }
}
