//! Error types for the capsule crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during Gemini operations.
///
/// Security errors (`CertificateMismatch`, `CertificateDate`) and the
/// input-required signals are part of the client contract: callers are
/// expected to match on them rather than treat every failure alike.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request URI, raised before any network I/O.
    #[error("Invalid Gemini URI: {0}")]
    InvalidUri(String),

    /// Malformed or oversized response header/body.
    #[error("Invalid Gemini response: {0}")]
    InvalidResponse(String),

    /// Timeout or connection refusal; never retried.
    #[error("No response: {0}")]
    NoResponse(String),

    /// Redirect limit exceeded.
    #[error("Tried too many redirects: {0}")]
    TooManyRedirects(String),

    /// Server requests input (status 10, 12-19); caller must collect
    /// input and re-request. A control-flow signal, not a failure.
    #[error("Input required for {uri}: {meta}")]
    InputRequired { uri: String, meta: String },

    /// Server requests sensitive input (status 11).
    #[error("Sensitive input required for {uri}: {meta}")]
    SensitiveInputRequired { uri: String, meta: String },

    /// Presented certificate differs from the pinned fingerprint.
    /// Carries the new fingerprint so the caller can offer an explicit
    /// re-trust action; never auto-resolved.
    #[error("Certificate fingerprint mismatch for {host}")]
    CertificateMismatch { host: String, fingerprint: String },

    /// Certificate is expired or not yet valid.
    #[error("Certificate expired or not yet valid")]
    CertificateDate,

    /// Server refused the request (status 53).
    #[error("Request refused: {0}")]
    RequestRefused(String),

    /// Generic TLS handshake or record-layer failure. The only kind the
    /// transport retries.
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create an invalid-URI error.
    pub fn invalid_uri(message: impl Into<String>) -> Self {
        Self::InvalidUri(message.into())
    }

    /// Create an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create a no-response error.
    pub fn no_response(message: impl Into<String>) -> Self {
        Self::NoResponse(message.into())
    }

    /// Whether the transport retry loop may attempt this failure again.
    /// Trust failures and timeouts are deliberately excluded.
    pub fn is_retryable_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}
