//! Resource bounds for Gemini requests.
//!
//! The protocol fixes most of these: requests are capped at 1024 bytes,
//! the status header at 1000 bytes before its CRLF, and this client caps
//! bodies at 10 MiB. `Default` yields the protocol values; tests shrink
//! them to exercise the limits cheaply.

use std::time::Duration;

/// Maximum UTF-8 encoded request length, terminating CRLF excluded.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// Maximum bytes read while searching for the header CRLF.
pub const MAX_HEADER_BYTES: usize = 1000;

/// Maximum response body size.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Resource bounds applied to every request.
///
/// # Semantics
///
/// - `request_timeout` covers one whole hop (connect, handshake, header,
///   body) and each connect attempt individually. It does not reset on
///   received chunks.
/// - `max_attempts` bounds the TLS retry loop; only generic TLS failures
///   are retried.
/// - `max_redirects` bounds hops followed within one top-level `get`.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Overall per-hop timeout.
    pub request_timeout: Duration,
    /// Total TLS handshake attempts (first try included).
    pub max_attempts: u32,
    /// Redirect hops followed before failing.
    pub max_redirects: u32,
    /// Request line size cap in UTF-8 bytes.
    pub max_request_bytes: usize,
    /// Header size cap in bytes before CRLF.
    pub max_header_bytes: usize,
    /// Body size cap in bytes.
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            max_redirects: 5,
            max_request_bytes: MAX_REQUEST_BYTES,
            max_header_bytes: MAX_HEADER_BYTES,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}
