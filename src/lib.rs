//! # Capsule
//!
//! Gemini protocol client with trust-on-first-use certificate pinning.
//!
//! Capsule speaks the Gemini wire protocol (single request line over TLS,
//! status header, bounded body) and pins server certificates per host:
//! first contact stores the certificate fingerprint, later contacts must
//! match it or fail with a distinguishable security error.

// Error taxonomy
pub mod error;

// Resource bounds (timeouts, size caps, retry/redirect limits)
pub mod limits;

// TOFU certificate verification and the certificate store contract
pub mod trust;

// TLS transport: connect, handshake, retry, request write
pub mod transport;

// Wire codec: status line parsing and bounded body reads
pub mod protocol;

// Client facade: fetch-as-text / fetch-as-bytes, redirect following
pub mod client;

// Caching decorator over the client contract
pub mod cache;

// Re-exports
pub use cache::{CachingClient, Documents, FileCache};
pub use client::{Fetch, GeminiClient};
pub use error::{Error, Result};
pub use limits::Limits;
pub use trust::{CertificateStore, MemoryCertificateStore, StoreError, TofuVerifier};
