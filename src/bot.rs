use std::sync::Arc;

use snafu::prelude::*;

use crate::{api, error, subscriber::Subscribers, ws, Config, Result};

/// Bot instance, ties api client, gateway client and subscribers together
#[derive(Debug, Clone)]
pub struct Bot {
    config: Arc<Config>,
    api: api::Client,
    gateway: ws::Client,
    subscribers: Arc<Subscribers>,
}

impl Bot {
    /// Create a bot, nothing is connected until [open](Self::open)
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let subscribers = Arc::new(Subscribers::new(config.sync_events));

        let api = api::Client::new(config.clone(), subscribers.clone())
            .context(error::CallAPIFailed)?;
        let gateway = ws::Client::new(config.clone(), api.clone(), subscribers.clone());

        log::info!("Create api and gateway client success");

        Ok(Self {
            config,
            api,
            gateway,
            subscribers,
        })
    }

    /// bot config
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// rest api client
    pub fn api(&self) -> &api::Client {
        &self.api
    }

    /// gateway client
    pub fn gateway(&self) -> &ws::Client {
        &self.gateway
    }

    /// event subscribers, register before [open](Self::open) to see every event
    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    /// Open gateway connection
    pub async fn open(&self) -> Result<()> {
        log::info!("Opening gateway ...");

        self.gateway.open().await.context(error::OpenGatewayFailed)
    }

    /// Close gateway connection, the bot can be opened again later
    pub async fn close(&self) -> Result<()> {
        self.gateway.close().await.context(error::CloseGatewayFailed)
    }
}
