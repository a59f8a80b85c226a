//! smp_transport — TLS transport handle, certificate pinning, and the
//! per-server session cache for the SMP agent (spec.md §4.3).
//!
//! # Modules
//! - `handle`  — transport handle parameters (C4)
//! - `tls`     — certificate-pinned `rustls::ClientConfig`
//! - `client`  — framed block I/O over the pinned TLS connection
//! - `session` — one-shot-fill session cache
//! - `error`   — transport error kinds

pub mod client;
pub mod error;
pub mod handle;
pub mod session;
pub mod tls;

pub use client::SmpClient;
pub use error::TransportError;
pub use handle::{ThParams, TransportHandle};
pub use session::{SessionCache, SessionKey};
