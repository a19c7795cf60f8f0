//! Gateway wire messages.

mod stream;
mod types;

pub use stream::{MessageStream, MessageStreamError};
pub use types::{Dispatch, Hello, Identify, IdentifyProperties, Resume};

pub(crate) use stream::{send_message, WebsocketSink};

use std::fmt::Display;

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use miniz_oxide::inflate::{self, TINFLStatus};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use snafu::prelude::*;

/// Error when parse binary data as message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParseMessageError {
    /// Decompress data failed
    #[snafu(display("decompress message failed: {status:?}"))]
    DecompressFailed {
        /// data for decode
        data: Bytes,
        /// decompress error status code
        status: TINFLStatus,
    },

    /// data is invalid json envelope
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// envelope carries an op code this client does not know
    #[snafu(display("message has unknown op code {op}"))]
    UnknownOpcode {
        /// raw op code
        op: u8,
    },

    /// envelope misses a field required by its op code
    #[snafu(display("{opcode} message has no {field} field"))]
    MissingField {
        /// op code
        opcode: Opcode,
        /// wire field name
        field: &'static str,
    },

    /// `d` field is not valid for its op code
    #[snafu(display("parse data of {opcode} message failed: {source}"))]
    ParseDataFailed {
        /// op code
        opcode: Opcode,
        /// source error
        source: serde_json::Error,
    },
}

/// Gateway operation code, values are fixed by protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Event dispatch, server -> client
    Dispatch = 0,
    /// Heartbeat, both directions
    Heartbeat = 1,
    /// Identify, client -> server
    Identify = 2,
    /// Resume, client -> server
    Resume = 6,
    /// Reconnect request, server -> client
    Reconnect = 7,
    /// Invalid session, server -> client
    InvalidSession = 9,
    /// Hello, server -> client
    Hello = 10,
    /// Heartbeat acknowledge, server -> client
    HeartbeatAck = 11,
}

impl Opcode {
    /// Create op code from wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    /// wire value
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// op code name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Identify => "Identify",
            Self::Resume => "Resume",
            Self::Reconnect => "Reconnect",
            Self::InvalidSession => "InvalidSession",
            Self::Hello => "Hello",
            Self::HeartbeatAck => "HeartbeatAck",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// Every frame on the wire is `{op, s?, t?, d}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// raw op code
    pub op: u8,
    /// dispatch sequence number
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// dispatch event type name
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// payload, decoded according to op code
    #[serde(rename = "d", default)]
    pub data: Option<Box<RawValue>>,
}

impl Envelope {
    fn data<T: DeserializeOwned>(&self, opcode: Opcode) -> Result<Option<T>, ParseMessageError> {
        self.data
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
            .context(error::ParseDataFailed { opcode })
    }

    fn required_data<T: DeserializeOwned>(&self, opcode: Opcode) -> Result<T, ParseMessageError> {
        self.data(opcode)?
            .context(error::MissingField { opcode, field: "d" })
    }
}

/// Gateway protocol message, one variant per op code
#[derive(Debug, Clone, EnumAsInner)]
pub enum Message {
    /// Event dispatch, server -> client
    Dispatch(Dispatch),
    /// Heartbeat carrying last sequence, both directions
    Heartbeat(Option<u64>),
    /// Identify, client -> server
    Identify(Identify),
    /// Resume, client -> server
    Resume(Resume),
    /// Reconnect request, server -> client
    Reconnect,
    /// Invalid session, the flag tells whether the session is resumable
    InvalidSession(bool),
    /// Hello, server -> client
    Hello(Hello),
    /// Heartbeat acknowledge, server -> client
    HeartbeatAck,
}

impl Message {
    /// Decode data to a message, inflate it first if `compressed`
    pub fn decode(mut buff: Bytes, compressed: bool) -> Result<Self, ParseMessageError> {
        if compressed {
            buff = inflate::decompress_to_vec_zlib(&buff)
                .map_err(|status| ParseMessageError::DecompressFailed {
                    data: buff.clone(),
                    status,
                })?
                .into();
        }

        let envelope: Envelope =
            serde_json::from_slice(&buff).context(error::ParseJSONFailed { data: buff.clone() })?;

        Self::from_envelope(envelope)
    }

    /// Interpret a decoded envelope by its op code
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ParseMessageError> {
        let opcode =
            Opcode::from_u8(envelope.op).context(error::UnknownOpcode { op: envelope.op })?;

        let message = match opcode {
            Opcode::Dispatch => {
                let sequence = envelope
                    .sequence
                    .context(error::MissingField { opcode, field: "s" })?;
                let type_name = envelope
                    .type_name
                    .context(error::MissingField { opcode, field: "t" })?;
                let data = envelope
                    .data
                    .context(error::MissingField { opcode, field: "d" })?;
                Self::Dispatch(Dispatch {
                    sequence,
                    type_name,
                    data,
                })
            }
            Opcode::Heartbeat => Self::Heartbeat(envelope.data(opcode)?),
            Opcode::Identify => Self::Identify(envelope.required_data(opcode)?),
            Opcode::Resume => Self::Resume(envelope.required_data(opcode)?),
            Opcode::Reconnect => Self::Reconnect,
            Opcode::InvalidSession => {
                Self::InvalidSession(envelope.data(opcode)?.unwrap_or_default())
            }
            Opcode::Hello => Self::Hello(envelope.required_data(opcode)?),
            Opcode::HeartbeatAck => Self::HeartbeatAck,
        };

        Ok(message)
    }

    /// encode to json text (without compress)
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        use serde_json::value::to_raw_value;

        let (sequence, type_name, data) = match self {
            Self::Dispatch(dispatch) => (
                Some(dispatch.sequence),
                Some(dispatch.type_name.clone()),
                Some(dispatch.data.clone()),
            ),
            Self::Heartbeat(sequence) => (None, None, Some(to_raw_value(sequence)?)),
            Self::Identify(identify) => (None, None, Some(to_raw_value(identify)?)),
            Self::Resume(resume) => (None, None, Some(to_raw_value(resume)?)),
            Self::InvalidSession(resumable) => (None, None, Some(to_raw_value(resumable)?)),
            Self::Hello(hello) => (None, None, Some(to_raw_value(hello)?)),
            Self::Reconnect | Self::HeartbeatAck => (None, None, None),
        };

        serde_json::to_string(&Envelope {
            op: self.opcode().as_u8(),
            sequence,
            type_name,
            data,
        })
    }

    /// get op code
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Dispatch(_) => Opcode::Dispatch,
            Self::Heartbeat(_) => Opcode::Heartbeat,
            Self::Identify(_) => Opcode::Identify,
            Self::Resume(_) => Opcode::Resume,
            Self::Reconnect => Opcode::Reconnect,
            Self::InvalidSession(_) => Opcode::InvalidSession,
            Self::Hello(_) => Opcode::Hello,
            Self::HeartbeatAck => Opcode::HeartbeatAck,
        }
    }

    /// get type name
    pub fn type_name(&self) -> &'static str {
        self.opcode().name()
    }
}
