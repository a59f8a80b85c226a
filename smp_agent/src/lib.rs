//! smp_agent — the SMP agent client runtime (spec.md §4.5-§4.8, C6-C8):
//! queue lifecycle state machine, inbound message pipeline, connection API,
//! and the background runtime that drives transport sessions, per-server
//! subscriptions, and worker restarts.
//!
//! # Modules
//! - `config`          — relay/network/session configuration (§6)
//! - `queue`            — queue and connection data model (§3, §4.5)
//! - `store`            — the persistence contract and an in-memory reference
//! - `state_machine`    — queue lifecycle transitions (§4.5, C6)
//! - `inbound`          — inbound message decrypt/integrity/dispatch pipeline
//! - `connection_api`   — create/join/send/suspend/delete (§4.6, C8)
//! - `runtime`          — transport sessions, subscriptions, worker restarts,
//!                        operation gating, command/event dispatch (C7)
//! - `notify`           — external `Ntf`/`EventSink` interfaces (§4.7, C10)
//! - `error`            — unified agent error taxonomy (§7)

pub mod config;
pub mod connection_api;
pub mod error;
pub mod inbound;
pub mod notify;
pub mod queue;
pub mod runtime;
pub mod state_machine;
pub mod store;

pub use config::{Config, Network, ProtocolServer, SessionMode};
pub use error::AgentError;
pub use notify::{EventSink, Ntf};
pub use queue::{Connection, RcvQueue, RcvQueueStatus, SndQueue, SndQueueStatus};
pub use runtime::AgentRuntime;
pub use store::{InMemoryStore, Store};
