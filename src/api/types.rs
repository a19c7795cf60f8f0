//! HTTP API request/response types

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// data type for api `GET /gateway`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayIndexData {
    /// gateway url
    pub url: String,
}

/// data type for api `GET /gateway/bot`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotData {
    /// gateway url
    pub url: String,
    /// recommended shard count
    pub shards: u32,
    /// identify budget of the bot
    pub session_start_limit: SessionStartLimit,
}

/// how many sessions the bot may still start
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionStartLimit {
    /// total allowed session starts per window
    pub total: u32,
    /// remaining session starts
    pub remaining: u32,
    /// milliseconds until the window resets
    pub reset_after: u64,
    /// identify requests allowed per 5 seconds
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

/// Body of a 429 response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TooManyRequests {
    /// rate limit bucket hash
    #[serde(default)]
    pub bucket: Option<String>,
    /// human readable message
    #[serde(default)]
    pub message: Option<String>,
    /// seconds to wait before retry
    pub retry_after: f64,
    /// whether the global rate limit was hit
    #[serde(default)]
    pub global: bool,
}

impl TooManyRequests {
    /// delay before the request may be retried
    pub fn retry_after(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_after).unwrap_or_default()
    }
}

/// Structured error body returned with non 2xx responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct APIErrorMessage {
    /// api error code
    pub code: i64,
    /// human readable message
    pub message: String,
}

/// Parse string as gateway url error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_gateway_url_error_variant),
    context(suffix(false))
)]
pub enum ParseGatewayURLError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the gateway url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// Gateway url as returned by discovery or `READY`, without connect parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayURLInfo {
    base: url::Url,
}

impl GatewayURLInfo {
    /// construct final url: trailing slash, `v=<version>` and `encoding=json`
    pub fn url(&self, version: u8) -> url::Url {
        let mut u = self.base.clone();

        if !u.path().ends_with('/') {
            let path = format!("{}/", u.path());
            u.set_path(&path);
        }

        u.query_pairs_mut()
            .clear()
            .append_pair("v", &version.to_string())
            .append_pair("encoding", "json");

        u
    }
}

impl FromStr for GatewayURLInfo {
    type Err = ParseGatewayURLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)
            .with_context(|_| parse_gateway_url_error_variant::InvalidURL { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            parse_gateway_url_error_variant::InvalidSchema {
                s,
                schema: url.scheme(),
            }
        );

        ensure!(
            url.host().is_some(),
            parse_gateway_url_error_variant::NoHost { s }
        );

        Ok(GatewayURLInfo { base: url })
    }
}

impl Display for GatewayURLInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.base.fmt(f)
    }
}
