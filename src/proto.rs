//! # Wire Protocol
//!
//! Every message on every socket in the dispatch fabric is a single frame of
//! the form `[1-byte command][payload]`, where the payload is a bincode
//! record. The command alphabet and its numeric values are a compatibility
//! contract shared by both brokers and all peers:
//!
//! | command | value | payload |
//! |---|---|---|
//! | `REQUEST` | 1 | [`SessionRequest`] |
//! | `RESPONSE` | 2 | [`SessionResponse`] |
//! | `SUBMIT` | 3 | [`Submit`] |
//! | `MESSAGE` | 4 | [`TestSubmit`] |
//! | `REPORT` | 5 | [`Report`] |
//! | `DELIVER` | 6 | [`Deliver`] |
//! | `REQ` | 7 | none |
//! | `OK` | 8 | none |
//! | `EMPTY` | 9 | none |
//! | `BYE` | 10 | none |
//! | `NOROUTE` | 11 | none |
//! | `REJECT` | 12 | none |
//! | `BUSY` | 13 | none |
//!
//! Framing on the TCP stream itself (the outer length prefix) lives in
//! [`crate::net`]; this module only deals with the command byte and the
//! payload records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of command bytes preceding the payload in a frame.
pub const FRAME_HEAD: usize = 1;

/// Upper bound on a single frame, command byte included.
///
/// The largest legitimate record is a `SUBMIT`/`DELIVER` carrying 160
/// content bytes plus fixed fields; anything near this bound is a corrupt
/// length prefix rather than traffic.
pub const MAX_FRAME: usize = 8 * 1024;

/// Errors produced while assembling or dissecting frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short to carry a command byte")]
    Short,

    #[error("frame of {0} bytes exceeds the frame bound")]
    Oversized(usize),

    #[error("unknown command byte {0}")]
    UnknownCommand(u8),

    #[error("payload codec error: {0}")]
    Payload(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One-byte command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Request = 1,
    Response = 2,
    Submit = 3,
    Message = 4,
    Report = 5,
    Deliver = 6,
    Req = 7,
    Ok = 8,
    Empty = 9,
    Bye = 10,
    NoRoute = 11,
    Reject = 12,
    Busy = 13,
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            3 => Ok(Command::Submit),
            4 => Ok(Command::Message),
            5 => Ok(Command::Report),
            6 => Ok(Command::Deliver),
            7 => Ok(Command::Req),
            8 => Ok(Command::Ok),
            9 => Ok(Command::Empty),
            10 => Ok(Command::Bye),
            11 => Ok(Command::NoRoute),
            12 => Ok(Command::Reject),
            13 => Ok(Command::Busy),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

/// Session direction declared in a handshake request.
///
/// `Test` and `Push` sessions produce items into the fabric; `Pull`
/// sessions consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Test,
    Pull,
    Push,
}

/// Handshake request received on a broker's control endpoint.
///
/// `id` identifies the peer: a customer account for client sessions, a
/// gateway channel for gateway-worker sessions. `addr` is informational and
/// only used for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub id: u32,
    pub kind: SessionKind,
    pub addr: String,
}

/// Handshake reply: where the freshly bound per-session endpoint lives.
///
/// `host` is a `tcp://ip:port` URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: u32,
    pub host: String,
}

/// An MT submission: one short message bound for a handset.
///
/// The first three digits of `phone` determine the carrier during routing.
/// `content` is an opaque payload of up to 160 bytes; `length` mirrors its
/// size for peers that preallocate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submit {
    pub id: u64,
    pub account: u32,
    pub company: u32,
    pub spid: String,
    pub spcode: String,
    pub phone: String,
    pub msgfmt: u8,
    pub length: u8,
    pub content: Vec<u8>,
}

/// Diagnostic submission carried by a TEST session.
///
/// Unlike [`Submit`], the target gateway queue is named explicitly via
/// `channel`; routing policy is bypassed entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSubmit {
    pub id: u64,
    pub channel: u32,
    pub spid: String,
    pub spcode: String,
    pub phone: String,
    pub msgfmt: u8,
    pub length: u8,
    pub content: Vec<u8>,
}

impl TestSubmit {
    /// Reshape into a [`Submit`] for queueing. Account attribution is not
    /// part of the diagnostic record.
    pub fn into_submit(self) -> Submit {
        Submit {
            id: self.id,
            account: 0,
            company: 0,
            spid: self.spid,
            spcode: self.spcode,
            phone: self.phone,
            msgfmt: self.msgfmt,
            length: self.length,
            content: self.content,
        }
    }
}

/// Delivery receipt for a previously submitted MT message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: u64,
    pub account: u32,
    pub company: u32,
    pub spcode: String,
    pub phone: String,
    pub status: u32,
    pub submittime: String,
    pub donetime: String,
}

/// Mobile-originated message flowing from a gateway toward a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliver {
    pub id: u64,
    pub account: u32,
    pub company: u32,
    pub phone: String,
    pub spcode: String,
    pub serviceid: String,
    pub msgfmt: u8,
    pub length: u8,
    pub content: Vec<u8>,
}

/// A command byte plus its encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A bare control frame with no payload (`REQ`, `OK`, `BYE`, ...).
    pub fn control(command: Command) -> Self {
        Self {
            command,
            payload: Vec::new(),
        }
    }

    /// Encode a record under the given command.
    pub fn encode<T: Serialize>(command: Command, body: &T) -> Result<Self, FrameError> {
        Ok(Self {
            command,
            payload: bincode::serialize(body)?,
        })
    }

    /// Decode the payload as the expected record type.
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, FrameError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Assemble the on-wire form `[command][payload]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_HEAD + self.payload.len());
        bytes.push(self.command as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Dissect the on-wire form. Empty input is a short frame; a command
    /// byte outside the alphabet is rejected without touching the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEAD {
            return Err(FrameError::Short);
        }

        Ok(Self {
            command: Command::try_from(bytes[0])?,
            payload: bytes[FRAME_HEAD..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_values_are_stable() {
        // The numeric alphabet is a wire compatibility contract.
        assert_eq!(Command::Request as u8, 1);
        assert_eq!(Command::Submit as u8, 3);
        assert_eq!(Command::Req as u8, 7);
        assert_eq!(Command::Empty as u8, 9);
        assert_eq!(Command::Busy as u8, 13);

        for value in 1..=13u8 {
            assert_eq!(Command::try_from(value).unwrap() as u8, value);
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            Command::try_from(0),
            Err(FrameError::UnknownCommand(0))
        ));
        assert!(matches!(
            Command::try_from(14),
            Err(FrameError::UnknownCommand(14))
        ));
        assert!(matches!(
            Frame::from_bytes(&[200, 1, 2, 3]),
            Err(FrameError::UnknownCommand(200))
        ));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(matches!(Frame::from_bytes(&[]), Err(FrameError::Short)));
    }

    #[test]
    fn submit_frame_carries_record() {
        let submit = Submit {
            id: 42,
            account: 7,
            company: 3,
            spid: "100861".into(),
            spcode: "10086".into(),
            phone: "13800000000".into(),
            msgfmt: 0,
            length: 5,
            content: b"hello".to_vec(),
        };

        let frame = Frame::encode(Command::Submit, &submit).unwrap();
        let parsed = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(parsed.command, Command::Submit);
        assert_eq!(parsed.decode::<Submit>().unwrap(), submit);
    }

    #[test]
    fn control_frame_has_no_payload() {
        let frame = Frame::control(Command::Bye);
        assert_eq!(frame.to_bytes(), vec![10]);
    }
}
