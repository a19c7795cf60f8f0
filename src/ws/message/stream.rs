use std::task::Poll;

use bytes::Bytes;
use futures_util::{ready, stream::SplitSink, stream::SplitStream, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite as websocket;

use super::{Message, ParseMessageError};
use crate::ws::client::WebsocketClient;

pub(crate) type WebsocketSink = SplitSink<WebsocketClient, websocket::Message>;

/// Error when read/write message stream/sink
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
pub enum MessageStreamError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// peer sent a close frame
    #[snafu(display("websocket closed by peer, code {code:?}: {reason}"))]
    Closed {
        /// close code
        code: Option<u16>,
        /// close reason
        reason: String,
    },

    /// parse frame data failed
    #[snafu(display("parse frame to message failed: {source}"))]
    ParseMessageFailed {
        /// source error
        source: ParseMessageError,
    },

    /// encode outgoing message failed
    #[snafu(display("encode message failed: {source}"))]
    EncodeMessageFailed {
        /// source error
        source: serde_json::Error,
    },
}

impl MessageStreamError {
    /// Check if this error will make the stream/sink stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Websocket { .. } | Self::Closed { .. } => true,
            Self::ParseMessageFailed { .. } | Self::EncodeMessageFailed { .. } => false,
        }
    }
}

/// Gateway message stream, read half of the websocket connection
#[derive(Debug)]
pub struct MessageStream {
    ws: SplitStream<WebsocketClient>,
    compress: bool,
}

impl MessageStream {
    /// Wrap the read half of a websocket connection.
    ///
    /// When `compress` is true binary frames are zlib inflated before parsing,
    /// text frames are always parsed as is.
    pub fn new(ws: SplitStream<WebsocketClient>, compress: bool) -> Self {
        Self { ws, compress }
    }

    fn decode(data: Bytes, compressed: bool) -> Result<Message, MessageStreamError> {
        Message::decode(data.clone(), compressed).map_err(|source| {
            log::trace!(
                "Parse failed message data: {}",
                std::str::from_utf8(&data).unwrap_or("<not-utf8-binary>")
            );
            MessageStreamError::ParseMessageFailed { source }
        })
    }
}

impl Stream for MessageStream {
    type Item = Result<Message, MessageStreamError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match ready!(self.ws.poll_next_unpin(cx)) {
                Some(frame) => frame.context(error::Websocket)?,
                None => return Poll::Ready(None),
            };

            let result = match frame {
                websocket::Message::Binary(data) => Self::decode(data.into(), self.compress),
                websocket::Message::Text(text) => Self::decode(text.into(), false),
                websocket::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or_default();
                    error::Closed { code, reason }.fail()
                }
                // ping/pong are answered by tungstenite itself
                _ => continue,
            };

            return Poll::Ready(Some(result));
        }
    }
}

/// Write one message as a text frame. The mutex is the single write lock
/// every writer of a connection goes through.
pub(crate) async fn send_message(
    sink: &Mutex<WebsocketSink>,
    message: &Message,
) -> Result<(), MessageStreamError> {
    let text = message.encode().context(error::EncodeMessageFailed)?;

    log::trace!("Send {} message", message.type_name());

    sink.lock()
        .await
        .send(websocket::Message::Text(text))
        .await
        .context(error::Websocket)
}
