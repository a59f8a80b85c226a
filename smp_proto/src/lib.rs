//! smp_proto — wire codec, protocol encoding, and connection links for the
//! SMP agent.
//!
//! # Modules
//! - `codec`    — wire primitives (C2): tagged fields, batching
//! - `command`  — protocol encoding (C3): command/response ADT, credential checks
//! - `envelope` — per-queue client message envelope (C5/C6 tie-in)
//! - `message`  — agent-level plaintext messages and integrity classification
//! - `uri`      — connection link encoding (§6)

pub mod codec;
pub mod command;
pub mod envelope;
pub mod message;
pub mod uri;

pub use codec::{CodecError, Reader, Transmission};
pub use command::{Command, CmdError, CommandError};
pub use envelope::{ClientMsgEnvelope, EnvelopeError, PrivateHeader};
pub use message::{AMessage, Integrity, InboundMessage, OutboundMessage, QueueInfo};
pub use uri::{ConnectionLink, HandshakeParams, LinkKind, UriError};
