use serde::{Deserialize, Serialize};
use serde_json::{value::RawValue, Map, Value};

use crate::api::types::TooManyRequests;

/// Emitted after a gateway connection is established
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Connect;

/// Emitted after a gateway connection is closed
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Disconnect;

/// Emitted on every rate limited REST response
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    /// decoded 429 response body
    pub too_many_requests: TooManyRequests,
    /// request url
    pub url: String,
}

/// `READY` dispatch, the first event of a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ready {
    /// gateway protocol version
    #[serde(rename = "v", default)]
    pub version: u8,
    /// session id used for resume
    pub session_id: String,
    /// url to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: String,
    /// `[shard_id, shard_count]`
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
    /// fields this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `RESUMED` dispatch, replay of missed events is complete
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resumed {
    /// fields this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `VOICE_SERVER_UPDATE` dispatch, consumed by voice connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    /// voice connection token
    pub token: String,
    /// guild the voice server belongs to
    pub guild_id: String,
    /// voice server host, absent while the server is reallocated
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// `VOICE_STATE_UPDATE` dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    /// guild id
    #[serde(default)]
    pub guild_id: Option<String>,
    /// joined channel, none when the user left
    #[serde(default)]
    pub channel_id: Option<String>,
    /// user id
    pub user_id: String,
    /// voice session id
    pub session_id: String,
    /// fields this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Dispatch whose type has no registered decoder
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// event type name
    pub type_name: String,
    /// dispatch sequence
    pub sequence: u64,
    /// undecoded payload
    pub data: Box<RawValue>,
}
