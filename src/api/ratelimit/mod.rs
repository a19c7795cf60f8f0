//! Per endpoint bucket rate limiter with a shared global throttle.

mod bucket;

pub use bucket::{Bucket, BucketGuard};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use snafu::prelude::*;

use bucket::GlobalThrottle;

/// Error when update a bucket from response headers
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ReleaseError {
    /// header value contains non visible ascii characters
    #[snafu(display("header {header} is not visible ascii: {source}"))]
    NotVisibleASCII {
        /// header name
        header: &'static str,
        /// source error
        source: reqwest::header::ToStrError,
    },

    /// header value is not a float number
    #[snafu(display("header {header} has invalid float value {value}: {source}"))]
    InvalidFloat {
        /// header name
        header: &'static str,
        /// header value
        value: String,
        /// source error
        source: std::num::ParseFloatError,
    },

    /// header value is not an integer
    #[snafu(display("header {header} has invalid integer value {value}: {source}"))]
    InvalidInteger {
        /// header name
        header: &'static str,
        /// header value
        value: String,
        /// source error
        source: std::num::ParseIntError,
    },

    /// reset timestamp given without a Date header to compare against
    #[snafu(display("response has X-RateLimit-Reset but no Date header"))]
    MissingDate,

    /// Date header is not a http date
    #[snafu(display("invalid Date header {value}: {source}"))]
    InvalidDate {
        /// header value
        value: String,
        /// source error
        source: chrono::ParseError,
    },
}

/// Fixed request budget for endpoints whose server side limit is stricter
/// than what the headers report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRateLimit {
    /// applies to bucket keys containing this pattern
    pub pattern: String,
    /// requests allowed per window
    pub requests: u32,
    /// window length
    pub window: Duration,
}

impl CustomRateLimit {
    /// reaction endpoints allow one call per 200ms
    pub fn reactions() -> Self {
        Self {
            pattern: "/reactions/".to_string(),
            requests: 1,
            window: Duration::from_millis(200),
        }
    }
}

/// Owns all buckets of a client
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    global: Arc<GlobalThrottle>,
    custom: Vec<CustomRateLimit>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(vec![CustomRateLimit::reactions()])
    }
}

impl RateLimiter {
    /// Create a limiter with custom limits
    pub fn new(custom: Vec<CustomRateLimit>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            global: Arc::new(GlobalThrottle::new()),
            custom,
        }
    }

    /// Get the bucket of a key, create it on first use. Buckets are never removed.
    pub fn bucket(&self, key: &str) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }

        let custom = self
            .custom
            .iter()
            .find(|rl| key.contains(rl.pattern.as_str()))
            .cloned();

        log::trace!("Create rate limit bucket {}, custom limit {:?}", key, custom);

        let bucket = Arc::new(Bucket::new(key.to_string(), custom, self.global.clone()));
        buckets.insert(key.to_string(), bucket.clone());
        bucket
    }

    /// Wait until the bucket of `key` allows a call and lock it.
    ///
    /// At most one guard per key exists at any time, the caller must
    /// [release](BucketGuard::release) it after the request.
    pub async fn acquire(&self, key: &str) -> BucketGuard {
        self.bucket(key).lock().await
    }

    /// Block every bucket for `delay`, used when a 429 body reports a global limit
    pub fn block_global(&self, delay: Duration) {
        self.global.block_for(delay);
    }

    /// time left on the global throttle
    pub fn global_wait(&self) -> Option<Duration> {
        self.global.remaining()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use tokio::time::Instant;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_static(v),
            );
        }
        map
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_bucket_does_not_wait() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        let guard = limiter.acquire("/channels/1/messages").await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(guard.remaining(), 0);
        guard.release(None).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_blocks_until_reset() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/channels/1/messages").await;
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Remaining", "0"),
                ("X-RateLimit-Reset-After", "2.5"),
            ])))
            .unwrap();

        let start = Instant::now();
        let guard = limiter.acquire("/channels/1/messages").await;

        assert!(start.elapsed() >= Duration::from_millis(2500));
        guard.release(None).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_calls_do_not_wait() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/users/@me").await;
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Remaining", "4"),
                ("X-RateLimit-Reset-After", "10"),
            ])))
            .unwrap();

        let start = Instant::now();
        let guard = limiter.acquire("/users/@me").await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(guard.remaining(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_is_serialized() {
        let limiter = Arc::new(RateLimiter::default());

        let first = limiter.acquire("POST /msgs").await;

        let second = tokio::spawn({
            let limiter = limiter.clone();
            async move {
                let guard = limiter.acquire("POST /msgs").await;
                let acquired_at = Instant::now();
                guard.release(None).unwrap();
                acquired_at
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!second.is_finished());

        let released_at = Instant::now();
        first
            .release(Some(&headers(&[
                ("X-RateLimit-Remaining", "0"),
                ("X-RateLimit-Reset-After", "1"),
            ])))
            .unwrap();

        let acquired_at = second.await.unwrap();
        assert!(acquired_at >= released_at + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_blocks_other_buckets() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/a").await;
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Global", "true"),
                ("X-RateLimit-Reset-After", "3"),
            ])))
            .unwrap();

        assert!(limiter.global_wait().is_some());

        let start = Instant::now();
        let guard = limiter.acquire("/b").await;

        assert!(start.elapsed() >= Duration::from_secs(3));
        guard.release(None).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_falls_back_to_retry_after() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/a").await;
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Global", "true"),
                ("Retry-After", "3"),
            ])))
            .unwrap();

        assert!(limiter.global_wait().is_some());

        let start = Instant::now();
        let guard = limiter.acquire("/b").await;

        assert!(start.elapsed() >= Duration::from_secs(3));
        guard.release(None).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_does_not_touch_own_reset() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/a").await;
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Global", "true"),
                ("X-RateLimit-Reset-After", "1"),
                ("X-RateLimit-Remaining", "5"),
            ])))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let start = Instant::now();
        let guard = limiter.acquire("/a").await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(guard.remaining(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_global_delays_every_bucket() {
        let limiter = RateLimiter::default();

        limiter.block_global(Duration::from_secs(2));

        let start = Instant::now();
        limiter.acquire("/x").await.release(None).unwrap();
        limiter.acquire("/y").await.release(None).unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(limiter.global_wait().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_timestamp_uses_date_header() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/c").await;
        // Date is 1445412480, reset two seconds later
        guard
            .release(Some(&headers(&[
                ("X-RateLimit-Remaining", "0"),
                ("X-RateLimit-Reset", "1445412482"),
                ("Date", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ])))
            .unwrap();

        let start = Instant::now();
        limiter.acquire("/c").await.release(None).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(2250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_unlocks_on_parse_error() {
        let limiter = RateLimiter::default();

        let guard = limiter.acquire("/d").await;
        let err = guard
            .release(Some(&headers(&[("X-RateLimit-Remaining", "lots")])))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidInteger { .. }));

        let start = Instant::now();
        limiter.acquire("/d").await.release(None).unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_limit_ignores_headers() {
        let limiter = RateLimiter::default();
        let key = "/channels/1/messages/2/reactions/x/@me";

        limiter
            .acquire(key)
            .await
            .release(Some(&headers(&[("X-RateLimit-Remaining", "50")])))
            .unwrap();

        let start = Instant::now();
        let guard = limiter.acquire(key).await;

        assert!(start.elapsed() >= Duration::from_millis(200));
        guard.release(None).unwrap();
    }

    #[test]
    fn test_buckets_are_created_once() {
        let limiter = RateLimiter::default();

        let a = limiter.bucket("/x");
        let b = limiter.bucket("/x");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), "/x");
    }
}
