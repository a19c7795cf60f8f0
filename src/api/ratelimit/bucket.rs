use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::header::HeaderMap;
use snafu::prelude::*;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};

use super::{error, CustomRateLimit, ReleaseError};

/// Extra delay added to header computed reset time, server clock and ours
/// are never perfectly aligned.
const RESET_SKEW_PADDING: Duration = Duration::from_millis(250);

static HEADER_REMAINING: &str = "X-RateLimit-Remaining";
static HEADER_RESET: &str = "X-RateLimit-Reset";
static HEADER_RESET_AFTER: &str = "X-RateLimit-Reset-After";
static HEADER_GLOBAL: &str = "X-RateLimit-Global";
static HEADER_RETRY_AFTER: &str = "Retry-After";
static HEADER_DATE: &str = "Date";

/// Process wide throttle shared by all buckets of a limiter.
///
/// Stored as milliseconds since `epoch` so it can be read without a lock.
#[derive(Debug)]
pub(crate) struct GlobalThrottle {
    epoch: Instant,
    until: AtomicU64,
}

impl GlobalThrottle {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            until: AtomicU64::new(0),
        }
    }

    pub fn set(&self, until: Instant) {
        let millis = until.saturating_duration_since(self.epoch).as_millis() as u64;
        self.until.fetch_max(millis, Ordering::AcqRel);
    }

    /// block every bucket for `delay` from now
    pub fn block_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        log::warn!("Global rate limit hit, all buckets blocked for {:?}", delay);
        self.set(until);
    }

    /// time left until the throttle is lifted
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.epoch + Duration::from_millis(self.until.load(Ordering::Acquire));
        let now = Instant::now();
        (until > now).then(|| until - now)
    }
}

#[derive(Debug)]
pub(crate) struct BucketState {
    pub remaining: i64,
    pub reset_at: Instant,
    last_reset: Option<Instant>,
}

/// A rate limit counter for one class of endpoints
#[derive(Debug)]
pub struct Bucket {
    key: String,
    custom: Option<CustomRateLimit>,
    global: Arc<GlobalThrottle>,
    state: Arc<Mutex<BucketState>>,
}

impl Bucket {
    pub(crate) fn new(
        key: String,
        custom: Option<CustomRateLimit>,
        global: Arc<GlobalThrottle>,
    ) -> Self {
        Self {
            key,
            custom,
            global,
            state: Arc::new(Mutex::new(BucketState {
                remaining: 1,
                reset_at: Instant::now(),
                last_reset: None,
            })),
        }
    }

    /// bucket key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// how long a caller holding the state must wait before sending
    fn wait_time(&self, state: &BucketState) -> Option<Duration> {
        let now = Instant::now();

        // out of calls and the window is still open
        if state.remaining < 1 && state.reset_at > now {
            return Some(state.reset_at - now);
        }

        self.global.remaining()
    }

    /// Take the bucket lock, sleep until a call is allowed, then consume one call.
    pub(crate) async fn lock(self: Arc<Self>) -> BucketGuard {
        let mut state = self.state.clone().lock_owned().await;

        while let Some(wait) = self.wait_time(&state) {
            log::debug!("Bucket {} exhausted, wait {:?}", self.key, wait);
            tokio::time::sleep(wait).await;
        }

        // window elapsed, a fresh call is available even if the count went negative
        if state.remaining < 1 {
            state.remaining = 1;
        }
        state.remaining -= 1;

        BucketGuard {
            bucket: self,
            state,
        }
    }
}

/// Exclusive access to a bucket for the duration of one request.
///
/// Dropping the guard unlocks the bucket without updating it, use
/// [release](BucketGuard::release) to feed response headers back.
#[derive(Debug)]
pub struct BucketGuard {
    bucket: Arc<Bucket>,
    state: OwnedMutexGuard<BucketState>,
}

impl BucketGuard {
    /// bucket key
    pub fn key(&self) -> &str {
        self.bucket.key()
    }

    /// calls left in current window
    pub fn remaining(&self) -> i64 {
        self.state.remaining
    }

    /// Update the bucket from response headers and unlock it.
    ///
    /// The bucket is unlocked even when a header fails to parse.
    pub fn release(mut self, headers: Option<&HeaderMap>) -> Result<(), ReleaseError> {
        if let Some(custom) = self.bucket.custom.clone() {
            self.roll_custom_window(&custom);
            return Ok(());
        }

        let headers = match headers {
            Some(h) => h,
            None => return Ok(()),
        };

        let remaining = header(headers, HEADER_REMAINING)?;
        let reset = header(headers, HEADER_RESET)?;
        let reset_after = header(headers, HEADER_RESET_AFTER)?
            .map(|value| seconds(HEADER_RESET_AFTER, value))
            .transpose()?;
        let global = header(headers, HEADER_GLOBAL)?;

        if global.is_some() {
            let retry_after = header(headers, HEADER_RETRY_AFTER)?
                .map(|value| seconds(HEADER_RETRY_AFTER, value))
                .transpose()?;

            match reset_after.or(retry_after) {
                Some(delay) => self.bucket.global.block_for(delay),
                None => log::warn!("Global rate limit flagged without a delay, ignored"),
            }
        } else if let Some(reset_after) = reset_after {
            self.state.reset_at = Instant::now() + reset_after;
        } else if let Some(reset) = reset {
            let date = header(headers, HEADER_DATE)?.context(error::MissingDate)?;
            let server_now = chrono::DateTime::parse_from_rfc2822(date)
                .context(error::InvalidDate { value: date })?;
            let reset_secs: f64 = reset.parse().context(error::InvalidFloat {
                header: HEADER_RESET,
                value: reset,
            })?;

            let delta_millis = (reset_secs * 1000.0) as i64 - server_now.timestamp_millis();
            let delta = Duration::from_millis(delta_millis.max(0) as u64) + RESET_SKEW_PADDING;
            self.state.reset_at = Instant::now() + delta;
        }

        if let Some(remaining) = remaining {
            self.state.remaining = remaining.parse().context(error::InvalidInteger {
                header: HEADER_REMAINING,
                value: remaining,
            })?;
        }

        Ok(())
    }

    fn roll_custom_window(&mut self, custom: &CustomRateLimit) {
        let now = Instant::now();

        let window_elapsed = self
            .state
            .last_reset
            .map(|last| now.duration_since(last) >= custom.window)
            .unwrap_or(true);

        if window_elapsed {
            self.state.remaining = i64::from(custom.requests) - 1;
            self.state.last_reset = Some(now);
        }

        if self.state.remaining < 1 {
            self.state.reset_at = now + custom.window;
        }
    }
}

fn seconds(name: &'static str, value: &str) -> Result<Duration, ReleaseError> {
    let secs: f64 = value.parse().context(error::InvalidFloat {
        header: name,
        value,
    })?;
    Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ReleaseError> {
    headers
        .get(name)
        .map(|value| value.to_str().context(error::NotVisibleASCII { header: name }))
        .transpose()
}
