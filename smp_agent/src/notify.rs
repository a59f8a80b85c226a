//! External notification interfaces (spec.md §4.7, C10): the `Ntf` trait a
//! caller implements to register/drop push-notification credentials against
//! a notification server, and `EventSink` as an alternative to draining
//! [`crate::runtime::dispatch::Dispatch::evt_rx`] by hand.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::queue::NotifierCreds;
use crate::runtime::dispatch::OutboundEnvelope;

/// Notification-server operations behind a queue's `notifier_creds`
/// (spec.md §3). The agent never talks NTF-protocol wire bytes itself here;
/// it calls out to whatever `Ntf` implementation the caller wires in.
#[async_trait]
pub trait Ntf: Send + Sync {
    async fn register(&self, server: &str, conn_id: &str) -> Result<NotifierCreds, AgentError>;
    async fn unregister(&self, server: &str, conn_id: &str) -> Result<(), AgentError>;
}

/// Receives every [`OutboundEnvelope`] the runtime emits. Implementations
/// typically forward to an app-level channel or UI callback.
pub trait EventSink: Send + Sync {
    fn on_event(&self, envelope: OutboundEnvelope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn on_event(&self, envelope: OutboundEnvelope) {
            self.seen.lock().push(envelope.conn_id);
        }
    }

    #[test]
    fn event_sink_receives_forwarded_envelopes() {
        use crate::runtime::dispatch::AgentEvt;

        let sink = RecordingSink { seen: Mutex::new(Vec::new()) };
        sink.on_event(OutboundEnvelope { corr_id: 1, conn_id: "c1".into(), evt: AgentEvt::Connected });
        assert_eq!(*sink.seen.lock(), vec!["c1".to_string()]);
    }
}
