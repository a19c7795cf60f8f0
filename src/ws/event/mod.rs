//! Gateway events, decoded from [Dispatch](super::message::Message::Dispatch) messages
//! or synthesized by the client itself.

mod types;

pub use types::*;

use enum_as_inner::EnumAsInner;
use serde_json::value::RawValue;

use super::message::Dispatch;

/// Event tag, one per [Event] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [Event::Connect]
    Connect,
    /// [Event::Disconnect]
    Disconnect,
    /// [Event::RateLimit]
    RateLimit,
    /// [Event::Ready]
    Ready,
    /// [Event::Resumed]
    Resumed,
    /// [Event::VoiceServerUpdate]
    VoiceServerUpdate,
    /// [Event::VoiceStateUpdate]
    VoiceStateUpdate,
    /// [Event::Unknown]
    Unknown,
}

/// Event type
#[derive(Debug, Clone, EnumAsInner)]
pub enum Event {
    /// gateway connected
    Connect(Connect),
    /// gateway disconnected
    Disconnect(Disconnect),
    /// REST request got rate limited
    RateLimit(RateLimit),
    /// session ready
    Ready(Ready),
    /// session resumed
    Resumed(Resumed),
    /// voice server update
    VoiceServerUpdate(VoiceServerUpdate),
    /// voice state update
    VoiceStateUpdate(VoiceStateUpdate),
    /// dispatch without registered decoder
    Unknown(RawEvent),
}

impl Event {
    /// get event tag
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::RateLimit(_) => EventKind::RateLimit,
            Self::Ready(_) => EventKind::Ready,
            Self::Resumed(_) => EventKind::Resumed,
            Self::VoiceServerUpdate(_) => EventKind::VoiceServerUpdate,
            Self::VoiceStateUpdate(_) => EventKind::VoiceStateUpdate,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }

    /// Decode a dispatch using the decoder registered for its type name.
    ///
    /// A type name without decoder is not an error, the raw payload is kept in
    /// [Event::Unknown].
    pub fn decode(dispatch: &Dispatch) -> Result<Self, serde_json::Error> {
        match DECODERS
            .iter()
            .find(|(name, _)| *name == dispatch.type_name)
        {
            Some((_, decoder)) => decoder(&dispatch.data),
            None => {
                log::warn!(
                    "No decoder for event type {}, forward it as unknown event",
                    dispatch.type_name
                );
                Ok(Self::Unknown(RawEvent {
                    type_name: dispatch.type_name.clone(),
                    sequence: dispatch.sequence,
                    data: dispatch.data.clone(),
                }))
            }
        }
    }
}

type Decoder = fn(&RawValue) -> Result<Event, serde_json::Error>;

static DECODERS: &[(&str, Decoder)] = &[
    ("READY", |raw| serde_json::from_str(raw.get()).map(Event::Ready)),
    ("RESUMED", |raw| {
        serde_json::from_str(raw.get()).map(Event::Resumed)
    }),
    ("VOICE_SERVER_UPDATE", |raw| {
        serde_json::from_str(raw.get()).map(Event::VoiceServerUpdate)
    }),
    ("VOICE_STATE_UPDATE", |raw| {
        serde_json::from_str(raw.get()).map(Event::VoiceStateUpdate)
    }),
];

/// Payload type carried by exactly one [Event] variant, used for typed subscriptions
pub trait TypedEvent: Clone + Send + Sync + 'static {
    /// variant tag
    const KIND: EventKind;

    /// borrow the payload if event is of this type
    fn from_event(event: &Event) -> Option<&Self>;
}

macro_rules! typed_event {
    ($($ty:ident => $as:ident),* $(,)?) => {
        $(
            impl TypedEvent for $ty {
                const KIND: EventKind = EventKind::$ty;

                fn from_event(event: &Event) -> Option<&Self> {
                    event.$as()
                }
            }
        )*
    };
}

typed_event! {
    Connect => as_connect,
    Disconnect => as_disconnect,
    RateLimit => as_rate_limit,
    Ready => as_ready,
    Resumed => as_resumed,
    VoiceServerUpdate => as_voice_server_update,
    VoiceStateUpdate => as_voice_state_update,
}

impl TypedEvent for RawEvent {
    const KIND: EventKind = EventKind::Unknown;

    fn from_event(event: &Event) -> Option<&Self> {
        event.as_unknown()
    }
}
