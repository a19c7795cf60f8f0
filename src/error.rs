//! framework error types

use snafu::prelude::*;

use super::api::Error as APIError;
use super::ws::{CloseError, OpenError};

/// framework result type
pub type Result<T> = std::result::Result<T, Error>;

/// framework error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Create or call api client failed
    #[snafu(display("call api failed: {source}"))]
    CallAPIFailed {
        /// source error
        source: APIError,
    },

    /// Open gateway connection failed
    #[snafu(display("open gateway failed: {source}"))]
    OpenGatewayFailed {
        /// source error
        source: OpenError,
    },

    /// Close gateway connection failed
    #[snafu(display("close gateway failed: {source}"))]
    CloseGatewayFailed {
        /// source error
        source: CloseError,
    },
}
