use std::{fmt::Debug, sync::Arc};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    api::types::GatewayURLInfo,
    ws::{
        event::RawEvent,
        message::{Identify, Message, MessageStream, Resume, WebsocketSink},
        Event,
    },
    Config,
};

/// One live socket and the two tasks serving it. Dropping `listening`
/// is the stop signal for both tasks.
pub(crate) struct Connection {
    pub id: u64,
    pub sink: Arc<Mutex<WebsocketSink>>,
    pub listening: watch::Sender<()>,
    pub listener: JoinHandle<Option<MessageStream>>,
    pub heartbeat: JoinHandle<()>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("listener_finished", &self.listener.is_finished())
            .field("heartbeat_finished", &self.heartbeat.is_finished())
            .finish()
    }
}

/// What the caller must do after a message was applied to the state
#[derive(Debug)]
pub(crate) enum Action {
    None,
    /// server asked for an immediate heartbeat
    Heartbeat,
    /// drop this connection and open a new one
    Reconnect,
    /// forward to subscribers
    Dispatch(Event),
}

/// Session fields, all guarded by one lock in the client
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    pub conn: Option<Connection>,
    pub sequence: u64,
    pub session_id: String,
    pub resume_url: Option<GatewayURLInfo>,
    pub gateway_url: Option<GatewayURLInfo>,
    pub last_heartbeat_ack: Option<Instant>,
    pub last_heartbeat_sent: Option<Instant>,
    pub connected_at: Option<Instant>,
}

impl ConnectionState {
    /// whether the stored session can be resumed instead of identified
    pub fn can_resume(&self) -> bool {
        self.sequence != 0 && !self.session_id.is_empty() && self.resume_url.is_some()
    }

    /// forget session, next open will identify
    pub fn invalidate_session(&mut self) {
        self.sequence = 0;
        self.session_id.clear();
        self.resume_url = None;
    }

    /// true if `id` is the currently stored connection
    pub fn is_current(&self, id: u64) -> bool {
        matches!(self.conn, Some(ref conn) if conn.id == id)
    }

    /// Identify for fresh session, Resume otherwise
    pub fn handshake_message(&self, config: &Config) -> Message {
        if self.can_resume() {
            Message::Resume(Resume {
                token: config.token.clone(),
                session_id: self.session_id.clone(),
                seq: self.sequence,
            })
        } else {
            Message::Identify(Identify {
                token: config.token.clone(),
                properties: config.identify_properties.clone(),
                compress: config.compress,
                large_threshold: config.large_threshold,
                shard: config.shard.map(|(id, count)| [id, count]),
                presence: config.presence.clone(),
                intents: config.intents,
            })
        }
    }

    /// Update session fields from a received message
    pub fn apply(&mut self, message: Message) -> Action {
        match message {
            Message::Dispatch(dispatch) => {
                // high-water mark, a late frame never moves it back
                self.sequence = self.sequence.max(dispatch.sequence);

                let event = Event::decode(&dispatch).unwrap_or_else(|err| {
                    log::warn!(
                        "Decode {} event failed: {}, forward it as unknown event",
                        dispatch.type_name,
                        err
                    );
                    Event::Unknown(RawEvent {
                        type_name: dispatch.type_name.clone(),
                        sequence: dispatch.sequence,
                        data: dispatch.data.clone(),
                    })
                });

                if let Event::Ready(ref ready) = event {
                    // new session, numbering starts over
                    self.sequence = dispatch.sequence;
                    self.session_id = ready.session_id.clone();
                    self.resume_url = match ready.resume_gateway_url.parse() {
                        Ok(url) => Some(url),
                        Err(err) => {
                            log::warn!("Ready event has unusable resume url: {}", err);
                            None
                        }
                    };
                    log::debug!(
                        "Session {} ready, resume url {:?}",
                        self.session_id,
                        self.resume_url
                    );
                }

                Action::Dispatch(event)
            }

            Message::Heartbeat(_) => Action::Heartbeat,

            Message::Reconnect => {
                log::info!("Server asked to reconnect");
                Action::Reconnect
            }

            Message::InvalidSession(resumable) => {
                log::info!("Session invalidated, resumable: {}", resumable);
                if !resumable {
                    self.invalidate_session();
                }
                Action::Reconnect
            }

            Message::Hello(_) | Message::HeartbeatAck => {
                self.last_heartbeat_ack = Some(Instant::now());
                Action::None
            }

            Message::Identify(_) | Message::Resume(_) => {
                log::warn!("Ignore client only {} message", message.type_name());
                Action::None
            }
        }
    }
}
