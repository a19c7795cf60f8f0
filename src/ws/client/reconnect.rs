use std::{sync::atomic::Ordering, time::Duration};

use super::{error::OpenError, Client};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 600;

/// Exponential backoff, 1, 2, 4, ... seconds capped at 600
#[derive(Debug)]
pub(crate) struct Backoff {
    next: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: INITIAL_BACKOFF_SECS,
        }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.next);
        self.next = (self.next * 2).min(MAX_BACKOFF_SECS);
        delay
    }
}

impl Client {
    /// Open again until success, or until another open won the race.
    ///
    /// Each call starts a new backoff episode. `closes` is the explicit close
    /// count seen when the failure was detected, any explicit close after
    /// that stops the loop.
    pub(crate) async fn reconnect(&self, closes: u64) {
        if !self.inner.config.should_reconnect_on_error {
            log::info!("Reconnect disabled, gateway stays closed");
            return;
        }

        let mut backoff = Backoff::default();

        loop {
            if self.inner.explicit_closes.load(Ordering::SeqCst) != closes {
                log::info!("Gateway closed explicitly, stop reconnecting");
                return;
            }

            match self.open().await {
                Ok(()) => {
                    log::info!("Gateway reconnected");
                    return;
                }
                Err(OpenError::AlreadyOpen) => {
                    log::debug!("Gateway already opened by someone else, stop reconnecting");
                    return;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    log::warn!("Reconnect gateway failed: {}, retry in {:?}", err, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
