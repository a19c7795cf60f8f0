//! # Cordial
//!
//! Gateway session and rate limited REST client for bots.
//!
//! ```no_run
//! use cordial::{ws::event::Ready, Bot, Config};
//!
//! # async fn run() -> cordial::Result<()> {
//! let bot = Bot::new(Config::new("Bot my-token"))?;
//!
//! bot.subscribers().on(|ready: Ready| async move {
//!     println!("session {} ready", ready.session_id);
//! });
//!
//! bot.open().await?;
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod subscriber;
pub mod ws;

mod bot;
mod error;

pub use bot::Bot;
pub use config::Config;
pub use error::{Error, Result};
pub use subscriber::{Subscriber, Subscribers};
