use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tokio_tungstenite as websocket;

use super::{
    error::{open_error, wait_hello_error, OpenError, WaitHelloError},
    WebsocketClient,
};
use crate::ws::message::{
    send_message, Hello, Message, MessageStream, MessageStreamError, WebsocketSink,
};

/// Handshake of one connection attempt, moving through
/// `Dial -> Connected -> Greeted -> Established`
#[derive(Debug)]
pub(crate) struct Handshake<S> {
    pub state: S,
}

#[derive(Debug)]
pub(crate) struct Dial {
    pub url: url::Url,
}

#[derive(Debug)]
pub(crate) struct Connected {
    pub ws: WebsocketClient,
}

#[derive(Debug)]
pub(crate) struct Greeted {
    pub sink: WebsocketSink,
    pub stream: MessageStream,
    pub hello: Hello,
}

/// Handshake done, the socket is ready for the heartbeat and listener tasks
#[derive(Debug)]
pub(crate) struct Established {
    pub sink: Arc<Mutex<WebsocketSink>>,
    pub stream: MessageStream,
    pub hello: Hello,
    /// the frame received after identify/resume, normally Ready or Resumed
    pub first: Option<Message>,
}

/// Next message, skipping and logging errors which do not break the stream
pub(crate) async fn next_message(
    stream: &mut MessageStream,
) -> Option<Result<Message, MessageStreamError>> {
    loop {
        match stream.next().await? {
            Err(err) if !err.is_fatal() => {
                log::warn!("Message stream error happened but ignored: {}", err);
            }
            result => return Some(result),
        }
    }
}

impl Handshake<Dial> {
    pub fn new(url: url::Url) -> Self {
        Self {
            state: Dial { url },
        }
    }

    pub async fn connect(self) -> Result<Handshake<Connected>, OpenError> {
        let u = self.state.url;

        log::debug!("Connecting gateway: {}", u);

        let mut conn_result = websocket::connect_async(u.as_str()).await;
        if conn_result.is_err() {
            log::warn!("First try to connect gateway failed, start second try");
            conn_result = websocket::connect_async(u.as_str()).await
        }

        let ws = conn_result
            .map(|(client, _)| client)
            .context(open_error::ConnectGatewayFailed { url: u.as_str() })?;

        log::debug!("Move to connected state");

        Ok(Handshake {
            state: Connected { ws },
        })
    }
}

impl Handshake<Connected> {
    async fn real_wait_hello(
        stream: &mut MessageStream,
        timeout: Duration,
    ) -> Result<Hello, WaitHelloError> {
        log::debug!("Waiting hello message, timeout {:?}", timeout);

        let message = match tokio::time::timeout(timeout, next_message(stream)).await {
            Err(_) => {
                log::warn!("Wait hello timeout");
                return wait_hello_error::Timeout.fail();
            }
            Ok(None) => return wait_hello_error::StreamEnded.fail(),
            Ok(Some(result)) => result.context(wait_hello_error::MessageStream)?,
        };

        log::debug!("Wait hello get a {} message", message.type_name());

        match message {
            Message::Hello(hello) => {
                log::debug!("Hello message data: {:?}", hello);
                ensure!(
                    hello.heartbeat_interval > 0,
                    wait_hello_error::ZeroHeartbeatInterval
                );
                Ok(hello)
            }
            other => wait_hello_error::MessageNotHello {
                opcode: other.opcode(),
            }
            .fail(),
        }
    }

    /// The first frame must be Hello, anything else aborts this attempt
    pub async fn wait_hello(
        self,
        compress: bool,
        timeout: Duration,
    ) -> Result<Handshake<Greeted>, OpenError> {
        let (sink, stream) = self.state.ws.split();
        let mut stream = MessageStream::new(stream, compress);

        let hello = Self::real_wait_hello(&mut stream, timeout)
            .await
            .context(open_error::WaitHello)?;

        log::debug!("Move to greeted state");

        Ok(Handshake {
            state: Greeted {
                sink,
                stream,
                hello,
            },
        })
    }
}

impl Handshake<Greeted> {
    /// Send identify or resume, then read the frame answering it.
    ///
    /// The answer is expected to be Ready or Resumed, but protocol does not
    /// guarantee it, so any other frame (or none within `timeout`) is only logged.
    pub async fn identify(
        self,
        message: Message,
        timeout: Duration,
    ) -> Result<Established, OpenError> {
        let Greeted {
            sink,
            mut stream,
            hello,
        } = self.state;
        let sink = Arc::new(Mutex::new(sink));

        log::debug!("Send {} message", message.type_name());

        send_message(&sink, &message)
            .await
            .context(open_error::SendHandshakeFailed {
                opcode: message.opcode(),
            })?;

        let first = match tokio::time::timeout(timeout, next_message(&mut stream)).await {
            Ok(Some(Ok(first))) => {
                let type_name = first.as_dispatch().map(|d| d.type_name.as_str());
                if !matches!(type_name, Some("READY") | Some("RESUMED")) {
                    log::warn!(
                        "Expect Ready or Resumed after {}, got {} {:?}",
                        message.type_name(),
                        first.type_name(),
                        type_name
                    );
                }
                Some(first)
            }
            Ok(Some(Err(err))) => {
                log::warn!("Read answer of {} failed: {}", message.type_name(), err);
                None
            }
            Ok(None) => {
                log::warn!("Stream ended after {}", message.type_name());
                None
            }
            Err(_) => {
                log::warn!("No answer of {} in {:?}", message.type_name(), timeout);
                None
            }
        };

        Ok(Established {
            sink,
            stream,
            hello,
            first,
        })
    }
}
