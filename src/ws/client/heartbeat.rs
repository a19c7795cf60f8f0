use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    time::{Instant, MissedTickBehavior},
};

use super::Client;
use crate::ws::message::{send_message, Message, MessageStreamError, WebsocketSink};

impl Client {
    /// Send one heartbeat carrying the latest dispatch sequence
    pub(super) async fn heartbeat(
        &self,
        id: u64,
        sink: &Mutex<WebsocketSink>,
    ) -> Result<(), MessageStreamError> {
        let sequence = self.inner.state.read().await.sequence;

        log::trace!("Send heartbeat with sequence {} on connection {}", sequence, id);

        send_message(sink, &Message::Heartbeat(Some(sequence).filter(|s| *s != 0))).await?;

        let mut state = self.inner.state.write().await;
        if state.is_current(id) {
            state.last_heartbeat_sent = Some(Instant::now());
        }

        Ok(())
    }
}

/// Heartbeat worker of one connection.
///
/// Stops when `listening` is closed, or after handing the connection to
/// [Client::fail_connection] when no ack arrived for `heartbeat_failed_acks`
/// intervals or the sink is broken.
pub(super) async fn run(
    client: Client,
    id: u64,
    sink: Arc<Mutex<WebsocketSink>>,
    mut listening: watch::Receiver<()>,
    interval: Duration,
) {
    let threshold = interval * client.inner.config.heartbeat_failed_acks;

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::debug!(
        "Heartbeat worker of connection {} start, interval {:?}, stale after {:?}",
        id,
        interval,
        threshold
    );

    loop {
        tokio::select! {
            biased;

            _ = listening.changed() => {
                log::debug!("Heartbeat worker of connection {} stop", id);
                break
            }

            _ = ticker.tick() => {}
        }

        let last_ack = client.inner.state.read().await.last_heartbeat_ack;
        if let Some(elapsed) = last_ack.map(|ack| ack.elapsed()) {
            if elapsed > threshold {
                log::warn!(
                    "No heartbeat ack on connection {} for {:?}, consider it dead",
                    id,
                    elapsed
                );
                client.fail_connection(id);
                break;
            }
        }

        if let Err(err) = client.heartbeat(id, &sink).await {
            log::warn!("Send heartbeat on connection {} failed: {}", id, err);
            if err.is_fatal() {
                client.fail_connection(id);
                break;
            }
        }
    }
}
