//! Gateway protocol client, see [Client] for the connection lifecycle

mod client;
pub mod event;
pub mod message;

pub use client::{Client, CloseError, OpenError, WaitHelloError};
pub use event::Event;
