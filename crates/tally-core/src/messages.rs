//! Wire messages exchanged between a tally client and server.
//!
//! Every frame is an [`Envelope`]: a numeric `type` plus a flattened payload.

use crate::channel::{ChannelEvent, DataKind};
use serde::{Deserialize, Serialize};

/// Protocol version advertised by clients and servers.
pub const PROTOCOL_VERSION: &str = "tally-v1";

/// Numeric message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MsgType {
    Open = 0x10,
    OpenOk = 0x11,
    OpenFail = 0x12,
    Data = 0x13,
    Eof = 0x14,
    SoftEof = 0x15,
    Break = 0x16,
    Exit = 0x17,
    Close = 0x18,

    Error = 0x20,
    Shutdown = 0x21,
}

impl From<MsgType> for u8 {
    fn from(m: MsgType) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0x10 => Ok(Self::Open),
            0x11 => Ok(Self::OpenOk),
            0x12 => Ok(Self::OpenFail),
            0x13 => Ok(Self::Data),
            0x14 => Ok(Self::Eof),
            0x15 => Ok(Self::SoftEof),
            0x16 => Ok(Self::Break),
            0x17 => Ok(Self::Exit),
            0x18 => Ok(Self::Close),
            0x20 => Ok(Self::Error),
            0x21 => Ok(Self::Shutdown),
            other => Err(format!("unknown message type: 0x{other:02x}")),
        }
    }
}

/// Kind of channel a client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Shell,
}

/// Stream a `Data` frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStream {
    /// Client input.
    Stdin,
    /// Out-of-band client data.
    Extended,
    /// Server normal output.
    Stdout,
    /// Server diagnostics.
    Stderr,
}

/// Error codes carried in [`ErrorPayload`].
pub mod error_code {
    pub const PROTOCOL: u32 = 1;
    pub const TIMEOUT: u32 = 2;
}

/// Envelope: every message has a `type` plus a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MsgType,

    #[serde(flatten)]
    pub payload: Payload,
}

/// All message payloads (untagged; `type` selects the meaning).
///
/// Variants with required fields come first so that decoding never
/// mistakes them for an empty payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Data(DataPayload),
    Error(ErrorPayload),
    Open(OpenPayload),
    OpenOk(OpenOkPayload),
    Reason(ReasonPayload),
    Break(BreakPayload),
    Exit(ExitPayload),
    Empty(EmptyPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPayload {
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOkPayload {
    pub session_id: String,
}

/// Shared by `OpenFail` and `Shutdown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    pub stream: DataStream,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakPayload {
    pub msec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPayload {
    pub status: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
}

impl Envelope {
    pub fn open() -> Self {
        Self {
            msg_type: MsgType::Open,
            payload: Payload::Open(OpenPayload {
                kind: ChannelKind::Shell,
                version: Some(PROTOCOL_VERSION.to_string()),
            }),
        }
    }

    pub fn open_ok(session_id: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::OpenOk,
            payload: Payload::OpenOk(OpenOkPayload {
                session_id: session_id.into(),
            }),
        }
    }

    pub fn open_fail(reason: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::OpenFail,
            payload: Payload::Reason(ReasonPayload {
                reason: reason.into(),
            }),
        }
    }

    pub fn data(stream: DataStream, text: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::Data,
            payload: Payload::Data(DataPayload {
                stream,
                text: text.into(),
            }),
        }
    }

    pub fn eof() -> Self {
        Self::empty(MsgType::Eof)
    }

    pub fn soft_eof() -> Self {
        Self::empty(MsgType::SoftEof)
    }

    pub fn close() -> Self {
        Self::empty(MsgType::Close)
    }

    pub fn brk(msec: u64) -> Self {
        Self {
            msg_type: MsgType::Break,
            payload: Payload::Break(BreakPayload { msec }),
        }
    }

    pub fn exit(status: u32) -> Self {
        Self {
            msg_type: MsgType::Exit,
            payload: Payload::Exit(ExitPayload { status }),
        }
    }

    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::Error,
            payload: Payload::Error(ErrorPayload {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::Shutdown,
            payload: Payload::Reason(ReasonPayload {
                reason: reason.into(),
            }),
        }
    }

    /// Map an inbound client frame to the session event it carries.
    ///
    /// Returns `None` for frames that are not session input (for example
    /// `Open`, `Close`, or server-to-client types).
    pub fn into_event(self) -> Option<ChannelEvent> {
        match (self.msg_type, self.payload) {
            (MsgType::Data, Payload::Data(p)) => {
                let kind = match p.stream {
                    DataStream::Stdin => DataKind::Normal,
                    DataStream::Extended => DataKind::Extended,
                    DataStream::Stdout | DataStream::Stderr => return None,
                };
                Some(ChannelEvent::Data { text: p.text, kind })
            }
            (MsgType::Eof, _) => Some(ChannelEvent::Eof),
            (MsgType::SoftEof, _) => Some(ChannelEvent::SoftEof),
            (MsgType::Break, Payload::Break(p)) => Some(ChannelEvent::Break { msec: p.msec }),
            _ => None,
        }
    }

    fn empty(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            payload: Payload::Empty(EmptyPayload {}),
        }
    }
}
