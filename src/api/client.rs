use std::sync::Arc;

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use snafu::prelude::*;

use super::error::variant::*;
use super::ratelimit::RateLimiter;
use super::types::*;
use super::Result;
use crate::{
    subscriber::Subscribers,
    ws::{event::RateLimit, Event},
    Config,
};

/// Scheme prefix a bot token must carry in the Authorization header
static AUTH_SCHEME: &str = "Bot ";

/// HTTP API Client.
///
/// Every request goes through the rate limiter bucket of its endpoint, so
/// clones of one client never exceed a bucket together.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    config: Arc<Config>,
    rate_limiter: Arc<RateLimiter>,
    subscribers: Arc<Subscribers>,
}

impl Client {
    /// Create a new api client, rate limit notifications go to `subscribers`
    pub fn new(config: Arc<Config>, subscribers: Arc<Subscribers>) -> Result<Self> {
        let mut auth_header_value: HeaderValue = config.token.parse().map_err(|_| {
            TokenInvalid {
                token: config.token.clone(),
            }
            .build()
        })?;
        auth_header_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .context(ClientCreateFailed)?;

        let rate_limiter = Arc::new(RateLimiter::new(config.custom_rate_limits.clone()));

        Ok(Self {
            client,
            config,
            rate_limiter,
            subscribers,
        })
    }

    /// the rate limiter shared by all clones of this client
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Send a request, using the path (without query) as bucket key
    pub async fn request(&self, method: Method, path: &str, body: Option<Bytes>) -> Result<Bytes> {
        let bucket = path.split('?').next().unwrap_or(path);
        self.request_with_bucket(method, path, body, bucket).await
    }

    /// Send a request with json body and parse json response
    pub async fn request_json<B, R>(&self, method: Method, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(body).context(EncodeBodyFailed)?;
        let resp = self.request(method, path, Some(body.into())).await?;
        Self::parse_body(resp)
    }

    /// Send a GET request and parse json response
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let resp = self.request(Method::GET, path, None).await?;
        Self::parse_body(resp)
    }

    fn parse_body<R: DeserializeOwned>(body: Bytes) -> Result<R> {
        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })
    }

    /// Send a request under the lock of `bucket`.
    ///
    /// 502 responses are retried up to `max_rest_retries` times. 429 responses
    /// always emit a [RateLimit] event, then are either retried after the
    /// server given delay (not counted as retry) or returned as
    /// [Error::RateLimited](super::Error::RateLimited). A global 429 also
    /// blocks every other bucket for the same delay.
    pub async fn request_with_bucket(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        bucket: &str,
    ) -> Result<Bytes> {
        let url = format!("{}{}", self.config.api_base, path);
        let mut attempt = 0;

        loop {
            let mut req = self.client.request(method.clone(), &url);
            if let Some(ref body) = body {
                req = req
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }
            let req = req.build().context(BuildRequestFailed)?;

            let guard = self.rate_limiter.acquire(bucket).await;

            log::trace!("{} {} attempt {}", method, url, attempt);

            let resp = match self.client.execute(req).await {
                Ok(resp) => resp,
                Err(source) => {
                    // no headers to learn from, keep bucket as is
                    drop(guard);
                    return Err(source).context(RequestFailed {
                        method,
                        url: &url,
                    });
                }
            };

            let status = resp.status();
            let retry_after_header = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok());

            guard
                .release(Some(resp.headers()))
                .context(ReleaseBucketFailed { bucket })?;

            let resp_body = resp.bytes().await.context(ReadBodyFailed { url: &url })?;

            match status {
                StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
                    return Ok(resp_body)
                }

                StatusCode::BAD_GATEWAY => {
                    ensure!(
                        attempt < self.config.max_rest_retries,
                        ExceededMaxRetries {
                            method,
                            url: &url,
                            status_code: status,
                            body: resp_body,
                        }
                    );
                    attempt += 1;
                    log::info!("{} {} failed ({}), retrying ...", method, url, status);
                }

                StatusCode::TOO_MANY_REQUESTS => {
                    let parsed = serde_json::from_slice::<TooManyRequests>(&resp_body);
                    let too_many_requests = match (parsed, retry_after_header) {
                        (Ok(body), _) => body,
                        (Err(_), Some(retry_after)) => TooManyRequests {
                            retry_after,
                            ..Default::default()
                        },
                        (Err(source), None) => {
                            return Err(source).context(ParseBodyFailed { body: resp_body })
                        }
                    };

                    if too_many_requests.global {
                        self.rate_limiter.block_global(too_many_requests.retry_after());
                    }

                    self.subscribers
                        .dispatch(Event::RateLimit(RateLimit {
                            too_many_requests: too_many_requests.clone(),
                            url: url.clone(),
                        }))
                        .await;

                    ensure!(
                        self.config.should_retry_on_rate_limit,
                        RateLimited {
                            url: &url,
                            too_many_requests,
                        }
                    );

                    log::warn!(
                        "Rate limited on {}, retry after {:?}",
                        url,
                        too_many_requests.retry_after()
                    );
                    tokio::time::sleep(too_many_requests.retry_after()).await;
                }

                StatusCode::UNAUTHORIZED if !self.config.token.starts_with(AUTH_SCHEME) => {
                    log::info!("Got 401 with a token that has no {:?} prefix", AUTH_SCHEME);
                    return Unauthorized.fail();
                }

                _ => {
                    let message = serde_json::from_slice::<APIErrorMessage>(&resp_body).ok();
                    return HTTPStatusNotOK {
                        method,
                        url: &url,
                        status_code: status,
                        body: resp_body,
                        message,
                    }
                    .fail();
                }
            }
        }
    }

    /// Call `GET /gateway`, get gateway url
    pub async fn gateway(&self) -> Result<String> {
        let data: GatewayIndexData = self.get_json("/gateway").await?;
        Ok(data.url)
    }

    /// Call `GET /gateway/bot`, get gateway url with sharding information
    pub async fn gateway_bot(&self) -> Result<GatewayBotData> {
        self.get_json("/gateway/bot").await
    }
}
