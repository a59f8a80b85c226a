//! Unified agent error taxonomy (spec.md §7).
//!
//! Propagation policy: transient broker errors are retried inside workers
//! with backoff and never surface unless the retry budget is exhausted;
//! permanent broker errors surface as an `ERR` event bound to the
//! connection id; ratchet/decryption errors surface as `MSG { integrity:
//! Error(..) }` without killing the connection; `Critical(false)` logs and
//! restarts the worker, `Critical(true)` retires it for operator
//! intervention.

use thiserror::Error;

use smp_crypto::error::CryptoError;
use smp_proto::command::CmdError;
use smp_transport::error::TransportError;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection not found")]
    NotFound,
    #[error("connection id already exists")]
    Duplicate,
    #[error("operation requires a duplex connection but this one is simplex")]
    Simplex,
}

#[derive(Debug, Error)]
pub enum AgentInnerError {
    #[error("message handling error: {0}")]
    Message(String),
    #[error("duplicate message delivery")]
    Duplicate,
    #[error("signature verification failed")]
    Signature,
    #[error("operation prohibited in the connection's current state")]
    Prohibited,
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error(transparent)]
    Crypto(CryptoErrorKind),
}

/// Thin wrapper so `CryptoError` (not `Clone`) can sit behind `AgentError`
/// without forcing every caller to match on the full crypto error type.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CryptoErrorKind(pub String);

impl From<CryptoError> for CryptoErrorKind {
    fn from(e: CryptoError) -> Self {
        CryptoErrorKind(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RatchetErrorKind {
    #[error("ratchet header could not be decrypted")]
    Header,
    #[error("too many skipped messages ({0})")]
    TooManySkipped(u64),
    #[error("message key for an earlier ratchet chain ({0} steps back)")]
    Earlier(u64),
    #[error("illegal hybrid-KEM state transition")]
    KemState,
}

/// Only ever called for the four `CryptoError` variants that are actually
/// ratchet-level; see `From<CryptoError> for AgentError` below, which routes
/// everything else to `AgentInnerError::Signature`/`Crypto` before this impl
/// is reached.
impl From<CryptoError> for RatchetErrorKind {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::HeaderDecrypt => RatchetErrorKind::Header,
            CryptoError::TooManySkipped(n) => RatchetErrorKind::TooManySkipped(n),
            CryptoError::Earlier(n) => RatchetErrorKind::Earlier(n),
            CryptoError::KemState(_) => RatchetErrorKind::KemState,
            other => unreachable!("non-ratchet CryptoError routed through RatchetErrorKind: {other}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("command error: {0}")]
    Cmd(#[from] CmdError),
    #[error("broker error talking to {host}: {detail}")]
    Broker { host: String, detail: String },
    #[error("connection error: {0}")]
    Conn(#[from] ConnError),
    #[error("agent error: {0}")]
    Agent(#[from] AgentInnerError),
    #[error("ratchet error: {0}")]
    Ratchet(#[from] RatchetErrorKind),
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("critical error (transient={transient}): {msg}")]
    Critical { transient: bool, msg: String },
    #[error("operation is inactive/suspended")]
    Inactive,
}

impl From<TransportError> for AgentError {
    fn from(e: TransportError) -> Self {
        AgentError::Broker { host: "relay".into(), detail: e.to_string() }
    }
}

impl From<CryptoError> for AgentError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::HeaderDecrypt
            | CryptoError::TooManySkipped(_)
            | CryptoError::Earlier(_)
            | CryptoError::KemState(_) => AgentError::Ratchet(e.into()),
            CryptoError::SignatureVerification => AgentError::Agent(AgentInnerError::Signature),
            other => AgentError::Agent(AgentInnerError::Crypto(other.into())),
        }
    }
}

impl From<crate::store::StoreError> for AgentError {
    fn from(e: crate::store::StoreError) -> Self {
        AgentError::Store(e.to_string())
    }
}

impl AgentError {
    /// Transient errors are retried by workers; see module docs.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Broker { .. } => true,
            AgentError::Inactive => true,
            AgentError::Critical { transient, .. } => *transient,
            _ => false,
        }
    }
}
