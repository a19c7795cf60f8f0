use snafu::prelude::*;
use tokio_tungstenite::tungstenite;

use crate::{
    api::types::ParseGatewayURLError,
    ws::message::{MessageStreamError, Opcode},
};

/// Error when wait websocket gateway hello message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(wait_hello_error), context(suffix(false)))]
pub enum WaitHelloError {
    /// No message received
    #[snafu(display("timeout when wait server hello message"))]
    Timeout,

    /// underlying message stream broken
    #[snafu(display("underlying message stream broken: {source}"))]
    MessageStream {
        /// source error
        source: MessageStreamError,
    },

    /// stream ended before any message
    #[snafu(display("connection closed before hello message"))]
    StreamEnded,

    /// received first message is not hello type
    #[snafu(display("received first message is {opcode}, not hello"))]
    MessageNotHello {
        /// op code of the received message
        opcode: Opcode,
    },

    /// hello message asks for heartbeat interval zero
    #[snafu(display("hello message has zero heartbeat interval"))]
    ZeroHeartbeatInterval,
}

/// Error when open gateway connection
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(open_error), context(suffix(false)))]
pub enum OpenError {
    /// a connection is already open, nothing was done
    #[snafu(display("gateway connection is already open"))]
    AlreadyOpen,

    /// get gateway url from api failed
    #[snafu(display("discover gateway url failed: {source}"))]
    DiscoverGatewayFailed {
        /// source error
        source: crate::api::Error,
    },

    /// gateway url returned by api or stored by ready event is invalid
    #[snafu(display("invalid gateway url: {source}"))]
    InvalidGatewayURL {
        /// source error
        source: ParseGatewayURLError,
    },

    /// connect to websocket gateway failed
    #[snafu(display("connect ws gateway {url} failed: {source}"))]
    ConnectGatewayFailed {
        /// connected url
        url: String,
        /// source error
        source: tungstenite::Error,
    },

    /// wait first server hello message failed
    #[snafu(display("wait server hello message failed: {source}"))]
    WaitHello {
        /// source error
        source: WaitHelloError,
    },

    /// send identify or resume failed
    #[snafu(display("send {opcode} message failed: {source}"))]
    SendHandshakeFailed {
        /// identify or resume
        opcode: Opcode,
        /// source error
        source: MessageStreamError,
    },
}

/// Error when close gateway connection
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(close_error), context(suffix(false)))]
pub enum CloseError {
    /// no connection is open
    #[snafu(display("no open gateway connection"))]
    NotFound,

    /// the connection asked to close was already replaced by another one
    #[snafu(display("connection {id} was already replaced"))]
    Superseded {
        /// id of the replaced connection
        id: u64,
    },
}
