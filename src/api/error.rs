use std::time::Duration;

use snafu::prelude::*;

use super::{
    ratelimit::ReleaseError,
    types::{APIErrorMessage, TooManyRequests},
};

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// token is invalid(contains invalid character that cant be send in HTTP header)
    #[snafu(display("token {token} is invalid"))]
    TokenInvalid {
        /// input token
        token: String,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// serialize request body failed
    #[snafu(display("encode request body failed: {source}"))]
    EncodeBodyFailed {
        /// source error
        source: serde_json::Error,
    },

    /// build api request failed
    #[snafu(display("build request failed: {source}"))]
    BuildRequestFailed {
        /// source error
        source: reqwest::Error,
    },

    /// send api request failed
    #[snafu(display("{} url {url} failed: {source}", method.as_str()))]
    RequestFailed {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// read response body failed
    #[snafu(display("read response body of {url} failed: {source}"))]
    ReadBodyFailed {
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// response rate limit headers are malformed, the bucket is released anyway
    #[snafu(display("update rate limit bucket {bucket} failed: {source}"))]
    ReleaseBucketFailed {
        /// bucket key
        bucket: String,
        /// source error
        source: ReleaseError,
    },

    /// server kept answering 502
    #[snafu(display("{} url {url} exceeded max retries, last status {status_code}", method.as_str()))]
    ExceededMaxRetries {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// last received status code
        status_code: reqwest::StatusCode,
        /// last response body
        body: bytes::Bytes,
    },

    /// request got rate limited and auto retry is disabled
    #[snafu(display("{url} rate limited, retry after {:?}", too_many_requests.retry_after()))]
    RateLimited {
        /// target url
        url: String,
        /// decoded 429 body
        too_many_requests: TooManyRequests,
    },

    /// got 401 and the token has no `Bot ` prefix
    #[snafu(display("unauthorized, token may be missing the \"Bot \" prefix"))]
    Unauthorized,

    /// http response of api request is not success
    #[snafu(display(
        "{} url {url} got http status code {status_code}{}",
        method.as_str(),
        message.as_ref().map(|m| format!(", code {}: {}", m.code, m.message)).unwrap_or_default()
    ))]
    HTTPStatusNotOK {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
        /// raw response body
        body: bytes::Bytes,
        /// decoded error body, if the body is one
        message: Option<APIErrorMessage>,
    },

    /// parse response body of api request as target json type failed
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },
}

impl Error {
    /// server requested delay, if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                too_many_requests, ..
            } => Some(too_many_requests.retry_after()),
            _ => None,
        }
    }
}
