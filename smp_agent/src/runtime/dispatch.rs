//! Command/event dispatch (spec.md §4.6 C7): one inbound queue of API
//! commands, one outbound queue of agent events, and a single reader task
//! that drains the former and routes to handlers.

use tokio::sync::mpsc;

use smp_proto::message::{AMessage, Integrity};

use crate::error::AgentError;

/// A unit of work submitted to the runtime, addressed by connection id.
#[derive(Debug)]
pub enum AgentCmd {
    Send { body: AMessage },
    Subscribe,
    Suspend,
    Delete,
}

/// An event the runtime emits back to the caller, addressed by connection
/// id and correlated with the command that produced it (if any).
#[derive(Debug)]
pub enum AgentEvt {
    Connected,
    Confirmation,
    Secured,
    Active,
    MsgReceived { integrity: Integrity, body: AMessage },
    MsgSent { internal_snd_id: u64 },
    Suspended,
    Deleted,
    Err(String),
    Critical { transient: bool, msg: String },
    /// A relay server's transport session dropped; every queue active on it
    /// has been moved back to `pending` (spec.md §3 session cache). Not
    /// addressed to a single connection, so its [`OutboundEnvelope::conn_id`]
    /// is empty.
    Down { server: String },
    /// The resubscription worker re-established `server`'s session and
    /// promoted its pending queues back to `active`.
    Up { server: String },
}

pub type CorrId = u64;

pub struct InboundEnvelope {
    pub corr_id: CorrId,
    pub conn_id: String,
    pub cmd: AgentCmd,
}

pub struct OutboundEnvelope {
    pub corr_id: CorrId,
    pub conn_id: String,
    pub evt: AgentEvt,
}

/// The two unbounded channels spanning the agent's public API and its
/// background runtime (spec.md §4.6, "two unbounded queues").
pub struct Dispatch {
    pub cmd_tx: mpsc::UnboundedSender<InboundEnvelope>,
    cmd_rx: mpsc::UnboundedReceiver<InboundEnvelope>,
    pub evt_tx: mpsc::UnboundedSender<OutboundEnvelope>,
    pub evt_rx: mpsc::UnboundedReceiver<OutboundEnvelope>,
}

impl Dispatch {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        Self { cmd_tx, cmd_rx, evt_tx, evt_rx }
    }

    /// Drain one inbound command, routing it through `handle`. Runs in the
    /// single reader task; `handle` does its own locking per connection id.
    pub async fn run_one<F, Fut>(&mut self, handle: F) -> bool
    where
        F: FnOnce(CorrId, String, AgentCmd) -> Fut,
        Fut: std::future::Future<Output = Result<AgentEvt, AgentError>>,
    {
        let Some(env) = self.cmd_rx.recv().await else { return false };
        let corr_id = env.corr_id;
        let conn_id = env.conn_id.clone();
        let evt = match handle(corr_id, env.conn_id, env.cmd).await {
            Ok(evt) => evt,
            Err(e) => AgentEvt::Err(e.to_string()),
        };
        let _ = self.evt_tx.send(OutboundEnvelope { corr_id, conn_id, evt });
        true
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_one_routes_command_and_emits_event() {
        let mut d = Dispatch::new();
        d.cmd_tx
            .send(InboundEnvelope { corr_id: 1, conn_id: "c1".into(), cmd: AgentCmd::Subscribe })
            .unwrap();
        let more = d
            .run_one(|_corr, _conn, _cmd| async { Ok(AgentEvt::Connected) })
            .await;
        assert!(more);
        let out = d.evt_rx.recv().await.unwrap();
        assert_eq!(out.corr_id, 1);
        assert!(matches!(out.evt, AgentEvt::Connected));
    }
}
