//! smp_crypto — cryptographic primitives for the SMP agent
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - All public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `identity`   — long-term Ed25519 identity / per-queue auth keypairs
//! - `x3dh`       — X3DH asynchronous key agreement, optionally hybridized
//!                  with a post-quantum KEM (see `ratchet::kem`)
//! - `ratchet`    — double ratchet: DH ratchet steps, header encryption,
//!                  skipped message keys, hybrid KEM state machine
//! - `aead`       — XChaCha20-Poly1305 message AEAD, AES-GCM wire AEAD, and
//!                  a crypto_box-style anonymous DH envelope for queues
//! - `kdf`        — HKDF key derivation
//! - `hash`       — BLAKE3 utilities (message IDs, previous-message hash chain)
//! - `padding`    — fixed-size padding for traffic analysis resistance
//! - `error`      — unified crypto error type

pub mod aead;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod padding;
pub mod ratchet;
pub mod x3dh;

pub use error::CryptoError;
