//! Protocol encoding (spec.md §4.2, C3): the tagged command/response ADT
//! exchanged between an SMP client and a relay, plus the credential checks
//! that run ahead of dispatch.

use thiserror::Error;

use crate::codec::{self, CodecError, Reader};

/// The protocol version range this build understands. Parsing is
/// version-gated: a field introduced at version `v` is only encoded or
/// decoded when the negotiated session version is `>= v`.
pub const MIN_VERSION: u16 = 1;
pub const CURRENT_VERSION: u16 = 2;

/// The `CMD` error kinds a credential-check violation produces (spec.md §7).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CmdError {
    #[error("command requires authentication but none was supplied")]
    NoAuth,
    #[error("command does not accept authentication")]
    HasAuth,
    #[error("command requires a non-empty entity id")]
    NoEntity,
    #[error("command is not permitted in this context")]
    Prohibited,
    #[error("unrecognized command tag")]
    Unknown,
    #[error("malformed command syntax")]
    Syntax,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cmd(#[from] CmdError),
    #[error("field {0} requires protocol version >= {1}, session is at {2}")]
    VersionGated(&'static str, u16, u16),
}

/// Which party a transmission travels between (spec.md §4.2 table); purely
/// documentary here, since the tag space already disambiguates commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Recipient,
    Sender,
    Notifier,
    Server,
}

macro_rules! tags {
    ($($name:ident = $val:expr),* $(,)?) => {
        $(const $name: u8 = $val;)*
    };
}

tags! {
    TAG_NEW = 1, TAG_SUB = 2, TAG_KEY = 3, TAG_NKEY = 4, TAG_NDEL = 5,
    TAG_GET = 6, TAG_ACK = 7, TAG_OFF = 8, TAG_DEL = 9, TAG_SEND = 10,
    TAG_PING = 11, TAG_NSUB = 12,
    TAG_IDS = 20, TAG_MSG = 21, TAG_NID = 22, TAG_NMSG = 23, TAG_END = 24,
    TAG_OK = 25, TAG_ERR = 26, TAG_PONG = 27,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Recipient creates a new queue, offering its auth key.
    New { rcv_auth_key: Vec<u8> },
    /// Recipient (re)subscribes to its receive queue.
    Sub,
    /// Recipient installs the sender's auth key (`Confirmed` -> `Secured`).
    Key { sender_key: Vec<u8> },
    /// Recipient installs a notifier key for push delivery.
    NKey { notifier_key: Vec<u8> },
    /// Recipient removes the notifier credential.
    NDel,
    /// Recipient long-polls for queued messages.
    Get,
    /// Recipient acknowledges the last delivered message.
    Ack,
    /// Recipient suspends the queue (`Active` -> `Disabled`).
    Off,
    /// Recipient permanently deletes the queue.
    Del,
    /// Sender places a message body into the queue.
    Send { flags: u8, body: Vec<u8> },
    /// Unauthenticated liveness probe.
    Ping,
    /// Notifier (re)subscribes to push notifications for a queue.
    NSub,
    /// Server reply to `NEW`: assigned ids plus the DH public key for the
    /// symmetric authenticator (version-gated: present only from v2).
    Ids { rcv_id: Vec<u8>, snd_id: Vec<u8>, srv_dh: Option<Vec<u8>> },
    /// Server delivers a queued message.
    Msg { msg_id: Vec<u8>, server_ts: u64, flags: u8, body: Vec<u8> },
    /// Server reply to `NKEY`: assigned notifier id and its DH public key.
    Nid { notifier_id: Vec<u8>, srv_ntf_dh: Vec<u8> },
    /// Server delivers a notifier-side message metadata stub.
    NMsg { nmsg_nonce: Vec<u8>, encrypted_nmsg_meta: Vec<u8> },
    /// Server signals the queue will send no more messages (`Disabled`/`DEL`).
    End,
    Ok,
    Err { cmd_error: CmdError },
    Pong,
}

impl Command {
    fn tag(&self) -> u8 {
        match self {
            Command::New { .. } => TAG_NEW,
            Command::Sub => TAG_SUB,
            Command::Key { .. } => TAG_KEY,
            Command::NKey { .. } => TAG_NKEY,
            Command::NDel => TAG_NDEL,
            Command::Get => TAG_GET,
            Command::Ack => TAG_ACK,
            Command::Off => TAG_OFF,
            Command::Del => TAG_DEL,
            Command::Send { .. } => TAG_SEND,
            Command::Ping => TAG_PING,
            Command::NSub => TAG_NSUB,
            Command::Ids { .. } => TAG_IDS,
            Command::Msg { .. } => TAG_MSG,
            Command::Nid { .. } => TAG_NID,
            Command::NMsg { .. } => TAG_NMSG,
            Command::End => TAG_END,
            Command::Ok => TAG_OK,
            Command::Err { .. } => TAG_ERR,
            Command::Pong => TAG_PONG,
        }
    }

    /// Party this command travels from, for the credential table below.
    fn party(&self) -> Party {
        match self {
            Command::New { .. } | Command::Sub | Command::Key { .. } | Command::NKey { .. }
            | Command::NDel | Command::Get | Command::Ack | Command::Off | Command::Del => Party::Recipient,
            Command::Send { .. } | Command::Ping => Party::Sender,
            Command::NSub => Party::Notifier,
            _ => Party::Server,
        }
    }

    pub fn encode(&self, version: u16) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Command::New { rcv_auth_key } => codec::put_bytes(&mut out, rcv_auth_key),
            Command::Sub | Command::NDel | Command::Get | Command::Ack | Command::Off
            | Command::Del | Command::Ping | Command::NSub | Command::End | Command::Ok
            | Command::Pong => {}
            Command::Key { sender_key } => codec::put_bytes(&mut out, sender_key),
            Command::NKey { notifier_key } => codec::put_bytes(&mut out, notifier_key),
            Command::Send { flags, body } => {
                codec::put_u8(&mut out, *flags);
                out.extend_from_slice(body); // Tail
            }
            Command::Ids { rcv_id, snd_id, srv_dh } => {
                codec::put_bytes(&mut out, rcv_id);
                codec::put_bytes(&mut out, snd_id);
                if version >= 2 {
                    codec::put_bytes(&mut out, srv_dh.as_deref().unwrap_or(&[]));
                }
            }
            Command::Msg { msg_id, server_ts, flags, body } => {
                codec::put_bytes(&mut out, msg_id);
                codec::put_u64(&mut out, *server_ts);
                if version >= 2 {
                    codec::put_u8(&mut out, *flags);
                }
                out.extend_from_slice(body); // Tail
            }
            Command::Nid { notifier_id, srv_ntf_dh } => {
                codec::put_bytes(&mut out, notifier_id);
                codec::put_bytes(&mut out, srv_ntf_dh);
            }
            Command::NMsg { nmsg_nonce, encrypted_nmsg_meta } => {
                codec::put_bytes(&mut out, nmsg_nonce);
                codec::put_bytes(&mut out, encrypted_nmsg_meta);
            }
            Command::Err { cmd_error } => codec::put_u8(&mut out, cmd_error_tag(*cmd_error)),
        }
        out
    }

    pub fn decode(bytes: &[u8], version: u16) -> Result<Self, CommandError> {
        let mut r = Reader::new(bytes);
        let tag = r.u8()?;
        let cmd = match tag {
            TAG_NEW => Command::New { rcv_auth_key: r.bytes()?.to_vec() },
            TAG_SUB => Command::Sub,
            TAG_KEY => Command::Key { sender_key: r.bytes()?.to_vec() },
            TAG_NKEY => Command::NKey { notifier_key: r.bytes()?.to_vec() },
            TAG_NDEL => Command::NDel,
            TAG_GET => Command::Get,
            TAG_ACK => Command::Ack,
            TAG_OFF => Command::Off,
            TAG_DEL => Command::Del,
            TAG_SEND => {
                let flags = r.u8()?;
                Command::Send { flags, body: r.tail().to_vec() }
            }
            TAG_PING => Command::Ping,
            TAG_NSUB => Command::NSub,
            TAG_IDS => {
                let rcv_id = r.bytes()?.to_vec();
                let snd_id = r.bytes()?.to_vec();
                let srv_dh = if version >= 2 {
                    let raw = r.bytes()?;
                    if raw.is_empty() { None } else { Some(raw.to_vec()) }
                } else {
                    None
                };
                Command::Ids { rcv_id, snd_id, srv_dh }
            }
            TAG_MSG => {
                let msg_id = r.bytes()?.to_vec();
                let server_ts = r.u64()?;
                let flags = if version >= 2 { r.u8()? } else { 0 };
                let body = r.tail().to_vec();
                Command::Msg { msg_id, server_ts, flags, body }
            }
            TAG_NID => {
                let notifier_id = r.bytes()?.to_vec();
                let srv_ntf_dh = r.bytes()?.to_vec();
                Command::Nid { notifier_id, srv_ntf_dh }
            }
            TAG_NMSG => {
                let nmsg_nonce = r.bytes()?.to_vec();
                let encrypted_nmsg_meta = r.bytes()?.to_vec();
                Command::NMsg { nmsg_nonce, encrypted_nmsg_meta }
            }
            TAG_END => Command::End,
            TAG_OK => Command::Ok,
            TAG_ERR => Command::Err { cmd_error: cmd_error_from_tag(r.u8()?)? },
            TAG_PONG => Command::Pong,
            _ => return Err(CommandError::Cmd(CmdError::Unknown)),
        };
        Ok(cmd)
    }

    /// Run the credential check for this command (spec.md §4.2/§8) before
    /// dispatch. `authenticated` reflects whether the transmission carried a
    /// non-empty authenticator; `entity_id` is the transmission's entity id.
    pub fn check_credentials(&self, authenticated: bool, entity_id: &[u8]) -> Result<(), CmdError> {
        let has_entity = !entity_id.is_empty();
        match self.party() {
            Party::Recipient => match self {
                Command::New { .. } => {
                    if !authenticated {
                        Err(CmdError::NoAuth)
                    } else if has_entity {
                        Err(CmdError::HasAuth)
                    } else {
                        Ok(())
                    }
                }
                _ => {
                    if !authenticated {
                        Err(CmdError::NoAuth)
                    } else if !has_entity {
                        Err(CmdError::NoEntity)
                    } else {
                        Ok(())
                    }
                }
            },
            Party::Sender => match self {
                Command::Send { .. } => {
                    if !has_entity {
                        Err(CmdError::NoEntity)
                    } else {
                        Ok(())
                    }
                }
                Command::Ping => {
                    if authenticated {
                        Err(CmdError::HasAuth)
                    } else {
                        Ok(())
                    }
                }
                _ => Ok(()),
            },
            Party::Notifier => {
                if !authenticated {
                    Err(CmdError::NoAuth)
                } else if !has_entity {
                    Err(CmdError::NoEntity)
                } else {
                    Ok(())
                }
            }
            Party::Server => Ok(()),
        }
    }
}

fn cmd_error_tag(e: CmdError) -> u8 {
    match e {
        CmdError::NoAuth => 1,
        CmdError::HasAuth => 2,
        CmdError::NoEntity => 3,
        CmdError::Prohibited => 4,
        CmdError::Unknown => 5,
        CmdError::Syntax => 6,
    }
}

fn cmd_error_from_tag(tag: u8) -> Result<CmdError, CommandError> {
    Ok(match tag {
        1 => CmdError::NoAuth,
        2 => CmdError::HasAuth,
        3 => CmdError::NoEntity,
        4 => CmdError::Prohibited,
        5 => CmdError::Unknown,
        6 => CmdError::Syntax,
        _ => return Err(CommandError::Cmd(CmdError::Unknown)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_without_auth_is_no_auth() {
        let cmd = Command::New { rcv_auth_key: vec![1, 2, 3] };
        assert_eq!(cmd.check_credentials(false, b""), Err(CmdError::NoAuth));
    }

    #[test]
    fn new_with_entity_id_is_has_auth() {
        let cmd = Command::New { rcv_auth_key: vec![1, 2, 3] };
        assert_eq!(cmd.check_credentials(true, b"queue-1"), Err(CmdError::HasAuth));
    }

    #[test]
    fn send_without_entity_is_no_entity() {
        let cmd = Command::Send { flags: 0, body: vec![1] };
        assert_eq!(cmd.check_credentials(false, b""), Err(CmdError::NoEntity));
    }

    #[test]
    fn sub_requires_auth_and_entity() {
        assert_eq!(Command::Sub.check_credentials(false, b"q"), Err(CmdError::NoAuth));
        assert_eq!(Command::Sub.check_credentials(true, b""), Err(CmdError::NoEntity));
        assert_eq!(Command::Sub.check_credentials(true, b"q"), Ok(()));
    }

    #[test]
    fn ping_never_authenticated() {
        assert_eq!(Command::Ping.check_credentials(false, b""), Ok(()));
        assert_eq!(Command::Ping.check_credentials(true, b""), Err(CmdError::HasAuth));
    }

    #[test]
    fn send_roundtrip() {
        let cmd = Command::Send { flags: 3, body: vec![9, 9, 9, 9] };
        let encoded = cmd.encode(CURRENT_VERSION);
        let decoded = Command::decode(&encoded, CURRENT_VERSION).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn msg_roundtrip_v1_has_no_flags_field() {
        let cmd = Command::Msg { msg_id: vec![1], server_ts: 42, flags: 0, body: vec![7, 7] };
        let encoded = cmd.encode(1);
        let decoded = Command::decode(&encoded, 1).unwrap();
        match decoded {
            Command::Msg { flags, body, .. } => {
                assert_eq!(flags, 0);
                assert_eq!(body, vec![7, 7]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ids_roundtrip_v2_carries_srv_dh() {
        let cmd = Command::Ids { rcv_id: vec![1], snd_id: vec![2], srv_dh: Some(vec![3; 32]) };
        let encoded = cmd.encode(2);
        let decoded = Command::decode(&encoded, 2).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn err_roundtrip() {
        let cmd = Command::Err { cmd_error: CmdError::Prohibited };
        let encoded = cmd.encode(CURRENT_VERSION);
        let decoded = Command::decode(&encoded, CURRENT_VERSION).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn unknown_tag_is_cmd_unknown() {
        let err = Command::decode(&[0xFF], CURRENT_VERSION).unwrap_err();
        assert!(matches!(err, CommandError::Cmd(CmdError::Unknown)));
    }
}
