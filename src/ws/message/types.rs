use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Hello message data
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl Hello {
    /// heartbeat interval as duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}

/// Connection properties reported in identify message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// operating system
    pub os: String,
    /// library name
    pub browser: String,
    /// library name
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Identify message data, starts a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    /// authorization token
    pub token: String,
    /// connection properties
    pub properties: IdentifyProperties,
    /// ask server to zlib compress binary frames
    pub compress: bool,
    /// member count above which a guild is considered large
    pub large_threshold: u32,
    /// `[shard_id, shard_count]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    /// initial presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
    /// gateway intents bitset
    pub intents: u64,
}

/// Resume message data, replays events missed since `seq`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// authorization token
    pub token: String,
    /// session to resume
    pub session_id: String,
    /// last received dispatch sequence
    pub seq: u64,
}

/// Dispatch message data, payload is kept raw until decoded into an event
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// serial number
    pub sequence: u64,
    /// event type name, e.g. `READY`
    pub type_name: String,
    /// undecoded event payload
    pub data: Box<RawValue>,
}
