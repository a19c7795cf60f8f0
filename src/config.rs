//! Client configuration

use std::time::Duration;

use crate::{api::ratelimit::CustomRateLimit, ws::message::IdentifyProperties};

static DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Environment variable read by [Config::from_env]
pub static TOKEN_ENV: &str = "BOT_TOKEN";

/// Gateway intents bits
#[derive(Debug)]
pub struct Intents;

#[allow(missing_docs)]
impl Intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MEMBERS: u64 = 1 << 1;
    pub const GUILD_VOICE_STATES: u64 = 1 << 7;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// intents that need no approval
    pub const DEFAULT: u64 =
        Self::GUILDS | Self::GUILD_VOICE_STATES | Self::GUILD_MESSAGES | Self::DIRECT_MESSAGES;
}

/// Configuration shared by the api and gateway client
#[derive(Debug, Clone)]
pub struct Config {
    /// authorization value, including scheme, e.g. `Bot xxxx`
    pub token: String,
    /// rest api base url, without trailing slash
    pub api_base: String,
    /// gateway protocol version
    pub gateway_version: u8,
    /// user agent of rest requests
    pub user_agent: String,

    /// identify intents
    pub intents: u64,
    /// `(shard_id, shard_count)`
    pub shard: Option<(u32, u32)>,
    /// ask gateway to compress frames
    pub compress: bool,
    /// identify large threshold
    pub large_threshold: u32,
    /// identify initial presence
    pub presence: Option<serde_json::Value>,
    /// identify connection properties
    pub identify_properties: IdentifyProperties,

    /// how many times a 502 response is retried
    pub max_rest_retries: u32,
    /// wait and retry 429 responses instead of returning them
    pub should_retry_on_rate_limit: bool,
    /// reconnect with backoff when the gateway connection fails
    pub should_reconnect_on_error: bool,
    /// run subscribers one after another instead of one task each
    pub sync_events: bool,

    /// missed heartbeat intervals before the connection is considered dead
    pub heartbeat_failed_acks: u32,
    /// how long to wait for hello (and ready) after dialing
    pub hello_timeout: Duration,
    /// how long to wait for peer close frame on close
    pub close_timeout: Duration,
    /// fixed limits for strict endpoints
    pub custom_rate_limits: Vec<CustomRateLimit>,
}

impl Config {
    /// Create config with token and defaults
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            gateway_version: 10,
            user_agent: APP_USER_AGENT.to_string(),
            intents: Intents::DEFAULT,
            shard: None,
            compress: true,
            large_threshold: 250,
            presence: None,
            identify_properties: IdentifyProperties::default(),
            max_rest_retries: 3,
            should_retry_on_rate_limit: true,
            should_reconnect_on_error: true,
            sync_events: false,
            heartbeat_failed_acks: 5,
            hello_timeout: Duration::from_secs(6),
            close_timeout: Duration::from_secs(5),
            custom_rate_limits: vec![CustomRateLimit::reactions()],
        }
    }

    /// Create config with token read from `BOT_TOKEN`
    pub fn from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV).ok().map(Self::new)
    }

    /// set rest api base url
    pub fn with_api_base<S: Into<String>>(mut self, api_base: S) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// set identify intents
    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    /// set shard `(id, count)`
    pub fn with_shard(mut self, id: u32, count: u32) -> Self {
        self.shard = Some((id, count));
        self
    }

    /// enable or disable frame compression
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// set initial presence
    pub fn with_presence(mut self, presence: serde_json::Value) -> Self {
        self.presence = Some(presence);
        self
    }

    /// set 502 retry budget
    pub fn with_max_rest_retries(mut self, retries: u32) -> Self {
        self.max_rest_retries = retries;
        self
    }

    /// enable or disable auto retry of 429 responses
    pub fn with_retry_on_rate_limit(mut self, retry: bool) -> Self {
        self.should_retry_on_rate_limit = retry;
        self
    }

    /// enable or disable reconnect after connection failure
    pub fn with_reconnect_on_error(mut self, reconnect: bool) -> Self {
        self.should_reconnect_on_error = reconnect;
        self
    }

    /// run subscribers sequentially
    pub fn with_sync_events(mut self, sync: bool) -> Self {
        self.sync_events = sync;
        self
    }

    /// set missed heartbeat intervals tolerated before reconnect
    pub fn with_heartbeat_failed_acks(mut self, count: u32) -> Self {
        self.heartbeat_failed_acks = count.max(1);
        self
    }

    /// set hello wait timeout
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// set the bound of a graceful close, the socket is dropped after it
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// replace custom rate limits
    pub fn with_custom_rate_limits(mut self, limits: Vec<CustomRateLimit>) -> Self {
        self.custom_rate_limits = limits;
        self
    }
}
