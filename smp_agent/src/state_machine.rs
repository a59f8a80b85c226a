//! Queue lifecycle transitions (spec.md §4.5, C6): recipient and sender
//! views of a queue's life, the confirmation/HELLO/REPLY exchange that
//! drives it, and the tie-break policies applied to out-of-order or
//! duplicate protocol events.

use smp_proto::message::AMessage;

use crate::error::{AgentError, AgentInnerError};
use crate::queue::{RcvQueueStatus, SndQueueStatus};

/// What happened to the connection as a result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No status change; event already accounted for.
    NoOp,
    RcvMoved(RcvQueueStatus),
    SndMoved(SndQueueStatus),
}

/// Recipient-side transitions (spec.md §4.5 table):
/// `New -(KEY)-> Secured -(HELLO)-> Active -(OFF)-> Disabled`, with
/// `Confirmed` reached once the sender's confirmation envelope has been
/// received and decrypted (not a `Command`, so modeled by
/// [`on_confirmation`] below).
pub fn on_key_installed(current: RcvQueueStatus) -> Result<Transition, AgentError> {
    match current {
        RcvQueueStatus::Confirmed => Ok(Transition::RcvMoved(RcvQueueStatus::Secured)),
        RcvQueueStatus::Secured => Ok(Transition::NoOp),
        _ => Err(AgentInnerError::Prohibited.into()),
    }
}

/// The queue's first private-header `Confirmation` envelope arrived.
/// Duplicate confirmations on an already-`Confirmed`/later queue are
/// prohibited, not silently accepted — a confirmation forges the sender's
/// identity key and must not be replayable.
pub fn on_confirmation(current: RcvQueueStatus) -> Result<Transition, AgentError> {
    match current {
        RcvQueueStatus::New => Ok(Transition::RcvMoved(RcvQueueStatus::Confirmed)),
        _ => Err(AgentInnerError::Prohibited.into()),
    }
}

/// A decrypted `AMessage::Hello` arrived on the ratchet.
pub fn on_hello(current: RcvQueueStatus) -> Result<Transition, AgentError> {
    match current {
        RcvQueueStatus::Secured => Ok(Transition::RcvMoved(RcvQueueStatus::Active)),
        RcvQueueStatus::Active => Err(AgentInnerError::Prohibited.into()), // duplicate HELLO
        _ => Err(AgentInnerError::Prohibited.into()),
    }
}

/// A decrypted `AMessage::Reply` arrived — only meaningful on a simplex
/// receive connection still awaiting its duplex upgrade. Doesn't move
/// `RcvQueueStatus` itself; the caller upgrades the connection shape
/// (`Rcv` -> `Duplex`) separately once this returns `Ok`.
pub fn on_reply_received(current: RcvQueueStatus, already_duplex: bool) -> Result<Transition, AgentError> {
    if already_duplex {
        return Err(AgentInnerError::Prohibited.into());
    }
    match current {
        RcvQueueStatus::Active => Ok(Transition::NoOp),
        _ => Err(AgentInnerError::Prohibited.into()),
    }
}

/// Sender-side transitions: `New -(server Ids)-> Confirmed -(HELLO sent
/// and acked)-> Active -(DEL/OFF by peer)-> Disabled`.
pub fn on_send_confirmed(current: SndQueueStatus) -> Result<Transition, AgentError> {
    match current {
        SndQueueStatus::New => Ok(Transition::SndMoved(SndQueueStatus::Confirmed)),
        _ => Ok(Transition::NoOp),
    }
}

pub fn on_hello_sent(current: SndQueueStatus) -> Result<Transition, AgentError> {
    match current {
        SndQueueStatus::Confirmed => Ok(Transition::SndMoved(SndQueueStatus::Active)),
        SndQueueStatus::Active => Ok(Transition::NoOp),
        _ => Err(AgentInnerError::Prohibited.into()),
    }
}

pub fn on_peer_disabled(current: SndQueueStatus) -> Result<Transition, AgentError> {
    match current {
        SndQueueStatus::Disabled => Ok(Transition::NoOp),
        _ => Ok(Transition::SndMoved(SndQueueStatus::Disabled)),
    }
}

/// What to do with a decrypted [`AMessage`] given the connection's current
/// recipient-side status. Out-of-band tags (`Introduce`/`IntroInvite`) pass
/// through unchanged regardless of status; `Hello`/`Reply` are gated. The
/// returned [`Transition`] is the caller's responsibility to apply to the
/// store — this function only classifies, it never persists.
pub fn classify_inbound(msg: &AMessage, status: RcvQueueStatus, already_duplex: bool) -> Result<Transition, AgentError> {
    match msg {
        AMessage::Hello => on_hello(status),
        AMessage::Reply { .. } => on_reply_received(status, already_duplex),
        AMessage::AMsg { .. } | AMessage::Introduce { .. } | AMessage::IntroInvite { .. } => {
            if status == RcvQueueStatus::Active {
                Ok(Transition::NoOp)
            } else {
                Err(AgentInnerError::Prohibited.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smp_proto::message::QueueInfo;

    #[test]
    fn recipient_happy_path() {
        assert_eq!(on_confirmation(RcvQueueStatus::New).unwrap(), Transition::RcvMoved(RcvQueueStatus::Confirmed));
        assert_eq!(on_key_installed(RcvQueueStatus::Confirmed).unwrap(), Transition::RcvMoved(RcvQueueStatus::Secured));
        assert_eq!(on_hello(RcvQueueStatus::Secured).unwrap(), Transition::RcvMoved(RcvQueueStatus::Active));
    }

    #[test]
    fn duplicate_hello_on_active_is_prohibited() {
        assert!(on_hello(RcvQueueStatus::Active).is_err());
    }

    #[test]
    fn reply_on_already_duplex_connection_is_prohibited() {
        assert!(on_reply_received(RcvQueueStatus::Active, true).is_err());
    }

    #[test]
    fn confirmation_on_non_new_queue_is_prohibited() {
        assert!(on_confirmation(RcvQueueStatus::Secured).is_err());
    }

    #[test]
    fn application_message_before_active_is_prohibited() {
        let msg = AMessage::AMsg { body: vec![1] };
        assert!(classify_inbound(&msg, RcvQueueStatus::Secured, false).is_err());
        assert!(classify_inbound(&msg, RcvQueueStatus::Active, false).is_ok());
    }

    #[test]
    fn classify_inbound_hello_reports_the_rcv_transition() {
        let hello = classify_inbound(&AMessage::Hello, RcvQueueStatus::Secured, false).unwrap();
        assert_eq!(hello, Transition::RcvMoved(RcvQueueStatus::Active));
    }

    #[test]
    fn classify_inbound_reply_on_already_duplex_is_prohibited() {
        let reply = AMessage::Reply { queue: QueueInfo { server: "s".into(), sender_id: vec![1], dh_public_key: vec![2; 32] } };
        assert!(classify_inbound(&reply, RcvQueueStatus::Active, true).is_err());
    }

    #[test]
    fn sender_happy_path() {
        assert_eq!(on_send_confirmed(SndQueueStatus::New).unwrap(), Transition::SndMoved(SndQueueStatus::Confirmed));
        assert_eq!(on_hello_sent(SndQueueStatus::Confirmed).unwrap(), Transition::SndMoved(SndQueueStatus::Active));
    }
}
