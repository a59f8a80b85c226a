//! Transport-level error kinds (spec.md §7, the `Broker` family).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error talking to {host}: {detail}")]
    Network { host: String, detail: String },
    #[error("timed out waiting on {host}")]
    Timeout { host: String },
    #[error("could not resolve or connect to host {host}")]
    Host { host: String },
    #[error("server {host} returned an unexpected response: {detail}")]
    Response { host: String, detail: String },
    #[error("unexpected transport state on {host}")]
    Unexpected { host: String },
    #[error("TLS/transport setup failed for {host}: {detail}")]
    Transport { host: String, detail: String },
    #[error("block contained an unparseable transmission")]
    BadBlock,
    #[error("server certificate does not match the pinned key_hash")]
    CertPinMismatch,
}

impl TransportError {
    /// Transient errors are retried by the caller with backoff (spec.md §7);
    /// permanent errors are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network { .. } | TransportError::Timeout { .. })
    }
}
