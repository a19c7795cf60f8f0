use std::sync::Arc;

use cordial::{
    ws::{
        event::{RateLimit, Ready},
        Event,
    },
    Bot, Config,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let config = Config::from_env().unwrap_or_else(|| {
        println!("No BOT_TOKEN env var or invalid");
        std::process::exit(1);
    });

    let bot = Bot::new(config).unwrap();

    bot.subscribers().on(|ready: Ready| async move {
        log::info!("Session {} ready", ready.session_id);
    });

    bot.subscribers().on(|limit: RateLimit| async move {
        log::warn!(
            "Rate limited on {}, retry after {:?}",
            limit.url,
            limit.too_many_requests.retry_after()
        );
    });

    bot.subscribers().subscribe(|event: Arc<Event>| async move {
        log::info!("Received {:?} event", event.kind());
    });

    bot.open().await.unwrap();

    tokio::signal::ctrl_c().await.unwrap();

    bot.close().await.unwrap();
}
