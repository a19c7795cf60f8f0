mod error;
mod handshake;
mod heartbeat;
mod listener;
mod reconnect;
mod state;

pub use error::{CloseError, OpenError, WaitHelloError};

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures_util::SinkExt;
use snafu::prelude::*;
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite as websocket;
use websocket::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};

use crate::{
    api::{self, types::GatewayURLInfo},
    subscriber::Subscribers,
    ws::{
        event::{Connect, Disconnect},
        message::{Message, MessageStream},
        Event,
    },
    Config,
};
use error::{close_error, open_error};
use handshake::{Established, Handshake};
use state::{Action, Connection, ConnectionState};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

/// Gateway client.
///
/// Holds at most one connection. When the connection fails in background
/// (read error, stale heartbeat, reconnect or invalid session op) it is closed
/// and, if enabled by config, opened again with exponential backoff. Cloning
/// is cheap and every clone controls the same connection.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<Config>,
    api: api::Client,
    subscribers: Arc<Subscribers>,
    state: RwLock<ConnectionState>,
    /// serializes open attempts, always taken before `state`
    opening: Mutex<()>,
    next_id: AtomicU64,
    explicit_closes: AtomicU64,
}

impl Client {
    /// Create a closed client, the api client is used for gateway discovery
    pub fn new(config: Arc<Config>, api: api::Client, subscribers: Arc<Subscribers>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                subscribers,
                state: RwLock::default(),
                opening: Mutex::new(()),
                next_id: AtomicU64::new(1),
                explicit_closes: AtomicU64::new(0),
            }),
        }
    }

    /// Open a connection, resuming the last session if possible.
    ///
    /// Errors are returned as is, this method itself never retries.
    pub async fn open(&self) -> Result<(), OpenError> {
        let _opening = self.inner.opening.lock().await;
        let config = &self.inner.config;

        let (resume_url, handshake) = {
            let state = self.inner.state.read().await;
            ensure!(state.conn.is_none(), open_error::AlreadyOpen);

            let resume_url = if state.can_resume() {
                state.resume_url.clone()
            } else {
                None
            };
            (resume_url, state.handshake_message(config))
        };

        let resuming = resume_url.is_some();
        let gateway = match resume_url {
            Some(url) => {
                log::info!("Resume session from {}", url);
                url
            }
            None => self.discover().await?,
        };

        let connected = match Handshake::new(gateway.url(config.gateway_version))
            .connect()
            .await
        {
            Ok(connected) => connected,
            Err(err) => {
                if !resuming {
                    self.inner.state.write().await.gateway_url = None;
                }
                return Err(err);
            }
        };

        let Established {
            sink,
            stream,
            hello,
            first,
        } = connected
            .wait_hello(config.compress, config.hello_timeout)
            .await?
            .identify(handshake, config.hello_timeout)
            .await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (listening, listening_rx) = watch::channel(());

        let action = {
            let mut state = self.inner.state.write().await;

            let now = Instant::now();
            state.last_heartbeat_ack = Some(now);
            state.last_heartbeat_sent = None;
            state.connected_at = Some(now);

            let action = match first {
                Some(message) => state.apply(message),
                None => Action::None,
            };

            // both tasks block on the state lock until the connection is stored
            let heartbeat = tokio::spawn(heartbeat::run(
                self.clone(),
                id,
                sink.clone(),
                listening_rx.clone(),
                hello.interval(),
            ));
            let listener = tokio::spawn(listener::run(self.clone(), id, stream, listening_rx));

            state.conn = Some(Connection {
                id,
                sink,
                listening,
                listener,
                heartbeat,
            });

            action
        };

        log::info!("Gateway connection {} open", id);

        self.inner.subscribers.dispatch(Event::Connect(Connect)).await;
        self.execute(id, action).await;

        Ok(())
    }

    async fn discover(&self) -> Result<GatewayURLInfo, OpenError> {
        let cached = self.inner.state.read().await.gateway_url.clone();
        if let Some(url) = cached {
            return Ok(url);
        }

        let url = self
            .inner
            .api
            .gateway()
            .await
            .context(open_error::DiscoverGatewayFailed)?;

        log::debug!("Discovered gateway url {}", url);

        let info: GatewayURLInfo = url.parse().context(open_error::InvalidGatewayURL)?;
        self.inner.state.write().await.gateway_url = Some(info.clone());

        Ok(info)
    }

    /// Close the connection with normal close code, the session can not be resumed
    pub async fn close(&self) -> Result<(), CloseError> {
        self.close_with_code(CloseCode::Normal.into()).await
    }

    /// Close the connection with given close code. Stops a running reconnect loop.
    pub async fn close_with_code(&self, code: u16) -> Result<(), CloseError> {
        self.inner.explicit_closes.fetch_add(1, Ordering::SeqCst);
        self.close_connection(None, CloseCode::from(code)).await
    }

    /// Stop tasks, send close frame, wait the peer close frame, then drop the
    /// socket. All steps together take at most `close_timeout`.
    ///
    /// With `id`, only closes if that connection is still the current one.
    async fn close_connection(&self, id: Option<u64>, code: CloseCode) -> Result<(), CloseError> {
        let conn = {
            let mut state = self.inner.state.write().await;

            match (state.conn.as_ref().map(|conn| conn.id), id) {
                (None, _) => return close_error::NotFound.fail(),
                (Some(current), Some(id)) if current != id => {
                    return close_error::Superseded { id }.fail()
                }
                _ => {}
            }

            state.connected_at = None;
            state.conn.take().context(close_error::NotFound)?
        };

        // a sync subscriber may close from inside the listener task
        let in_listener = listener::current() == Some(conn.id);

        let Connection {
            id,
            sink,
            listening,
            mut listener,
            mut heartbeat,
        } = conn;
        let deadline = Instant::now() + self.inner.config.close_timeout;

        log::info!(
            "Closing gateway connection {} with code {}",
            id,
            u16::from(code)
        );

        drop(listening);

        match tokio::time::timeout_at(deadline, &mut heartbeat).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::debug!("Heartbeat worker of connection {} panicked: {}", id, err),
            Err(_) => {
                log::warn!("Heartbeat worker of connection {} did not stop in time, abort it", id);
                heartbeat.abort();
            }
        }

        let stream = if in_listener {
            None
        } else {
            join_listener(id, &mut listener, deadline).await
        };

        let frame = CloseFrame {
            code,
            reason: "".into(),
        };
        let sent = tokio::time::timeout_at(deadline, async {
            let mut sink = sink.lock().await;
            sink.send(websocket::tungstenite::Message::Close(Some(frame)))
                .await
        })
        .await;

        match sent {
            Ok(Ok(())) if in_listener => {
                // the listener only stops after this call returns to it
                tokio::spawn(async move {
                    if let Some(stream) = join_listener(id, &mut listener, deadline).await {
                        wait_peer_close(id, stream, deadline).await;
                    }
                });
            }
            Ok(Ok(())) => {
                if let Some(stream) = stream {
                    wait_peer_close(id, stream, deadline).await;
                }
            }
            Ok(Err(err)) => log::debug!("Send close frame on connection {} failed: {}", id, err),
            Err(_) => log::warn!("Send close frame on connection {} timed out", id),
        }
        drop(sink);

        log::info!("Gateway connection {} closed", id);

        self.inner
            .subscribers
            .dispatch(Event::Disconnect(Disconnect))
            .await;

        Ok(())
    }

    /// Close connection `id` with restart code then reconnect.
    ///
    /// Runs in its own task. Only the first caller for a connection gets past
    /// the close, later ones see it superseded and stop, so one failure
    /// causes exactly one reconnect. An explicit close made after this call
    /// cancels the reconnect.
    pub(crate) fn fail_connection(&self, id: u64) {
        let client = self.clone();
        let closes = self.inner.explicit_closes.load(Ordering::SeqCst);

        tokio::spawn(async move {
            match client.close_connection(Some(id), CloseCode::Restart).await {
                Ok(()) => client.reconnect(closes).await,
                Err(err) => log::debug!("Failure of connection {} already handled: {}", id, err),
            }
        });
    }

    async fn handle_message(&self, id: u64, message: Message) {
        let action = {
            let mut state = self.inner.state.write().await;
            if !state.is_current(id) {
                log::debug!("Drop {} message of stale connection {}", message.type_name(), id);
                return;
            }
            state.apply(message)
        };

        self.execute(id, action).await;
    }

    async fn execute(&self, id: u64, action: Action) {
        match action {
            Action::None => {}
            Action::Heartbeat => {
                let sink = self
                    .inner
                    .state
                    .read()
                    .await
                    .conn
                    .as_ref()
                    .filter(|conn| conn.id == id)
                    .map(|conn| conn.sink.clone());

                if let Some(sink) = sink {
                    if let Err(err) = self.heartbeat(id, &sink).await {
                        log::warn!("Send requested heartbeat failed: {}", err);
                    }
                }
            }
            Action::Reconnect => self.fail_connection(id),
            Action::Dispatch(event) => self.inner.subscribers.dispatch(event).await,
        }
    }

    /// true if a connection is open
    pub async fn is_open(&self) -> bool {
        self.inner.state.read().await.conn.is_some()
    }

    /// last received dispatch sequence, 0 for no session
    pub async fn sequence(&self) -> u64 {
        self.inner.state.read().await.sequence
    }

    /// current session id, empty for no session
    pub async fn session_id(&self) -> String {
        self.inner.state.read().await.session_id.clone()
    }

    /// url used on resume
    pub async fn resume_url(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .await
            .resume_url
            .as_ref()
            .map(ToString::to_string)
    }

    /// time of last heartbeat ack (or hello)
    pub async fn last_heartbeat_ack(&self) -> Option<Instant> {
        self.inner.state.read().await.last_heartbeat_ack
    }

    /// time of last sent heartbeat
    pub async fn last_heartbeat_sent(&self) -> Option<Instant> {
        self.inner.state.read().await.last_heartbeat_sent
    }

    /// when the current connection was opened
    pub async fn connected_at(&self) -> Option<Instant> {
        self.inner.state.read().await.connected_at
    }
}

/// Wait the listener to hand back the stream, abort it at `deadline`
async fn join_listener(
    id: u64,
    listener: &mut JoinHandle<Option<MessageStream>>,
    deadline: Instant,
) -> Option<MessageStream> {
    match tokio::time::timeout_at(deadline, &mut *listener).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            log::debug!("Listener of connection {} panicked: {}", id, err);
            None
        }
        Err(_) => {
            log::warn!("Listener of connection {} did not stop in time, abort it", id);
            listener.abort();
            None
        }
    }
}

async fn wait_peer_close(id: u64, mut stream: MessageStream, deadline: Instant) {
    let peer_closed = tokio::time::timeout_at(deadline, async {
        while let Some(result) = handshake::next_message(&mut stream).await {
            if result.is_err() {
                break;
            }
        }
    })
    .await;

    if peer_closed.is_err() {
        log::debug!("Peer did not close connection {} in time", id);
    }
}
