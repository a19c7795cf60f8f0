//! Event subscribers.
//!
//! Subscribers are kept in slots keyed by [EventKind]. Typed subscriptions
//! ([Subscribers::on]) pick their slot from the payload type at registration
//! time, so dispatch is a map lookup and never inspects subscriber types.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::Debug,
    future::Future,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::ws::{
    event::{EventKind, TypedEvent},
    Event,
};

/// Subscriber can be registered to a client and process events.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// subscriber name
    fn name(&self) -> Cow<'static, str>;
    /// callback will be executed for every event this subscriber is registered for
    async fn on_event(self: Arc<Self>, event: Arc<Event>);
}

#[async_trait::async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        "Anonymous Fn Subscriber".into()
    }

    async fn on_event(self: Arc<Self>, event: Arc<Event>) {
        self(event).await
    }
}

/// Adapts a closure over one payload type to [Subscriber]
struct Typed<T, F> {
    f: F,
    _payload: PhantomData<fn(T)>,
}

#[async_trait::async_trait]
impl<T, F, Fut> Subscriber for Typed<T, F>
where
    T: TypedEvent,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        std::any::type_name::<T>().into()
    }

    async fn on_event(self: Arc<Self>, event: Arc<Event>) {
        let payload = T::from_event(&event).cloned();
        if let Some(payload) = payload {
            (self.f)(payload).await
        }
    }
}

/// Handle returned on registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Slot {
    id: SubscriptionId,
    once: bool,
    subscriber: Arc<dyn Subscriber>,
}

impl Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("once", &self.once)
            .field("subscriber", &self.subscriber.name())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Slots {
    by_kind: HashMap<EventKind, Vec<Slot>>,
    any: Vec<Slot>,
}

impl Slots {
    fn all_mut(&mut self) -> impl Iterator<Item = &mut Vec<Slot>> {
        self.by_kind.values_mut().chain(std::iter::once(&mut self.any))
    }
}

/// Registry of subscribers, the sink every decoded or synthesized event goes to
#[derive(Debug)]
pub struct Subscribers {
    sync: bool,
    next_id: AtomicU64,
    slots: RwLock<Slots>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Subscribers {
    /// Create an empty registry.
    ///
    /// When `sync` is true subscribers are awaited one by one in registration
    /// order, otherwise each one runs in its own task.
    pub fn new(sync: bool) -> Self {
        Self {
            sync,
            next_id: AtomicU64::new(1),
            slots: RwLock::default(),
        }
    }

    fn insert(&self, kind: Option<EventKind>, once: bool, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        log::debug!(
            "Register subscriber {} for {:?}",
            subscriber.name(),
            kind
        );

        let slot = Slot {
            id,
            once,
            subscriber,
        };

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match kind {
            Some(kind) => slots.by_kind.entry(kind).or_default().push(slot),
            None => slots.any.push(slot),
        }

        id
    }

    /// Register a subscriber for all events
    pub fn subscribe<S: Subscriber + 'static>(&self, subscriber: S) -> SubscriptionId {
        self.insert(None, false, Arc::new(subscriber))
    }

    /// Register a subscriber for one kind of event
    pub fn subscribe_kind<S: Subscriber + 'static>(
        &self,
        kind: EventKind,
        subscriber: S,
    ) -> SubscriptionId {
        self.insert(Some(kind), false, Arc::new(subscriber))
    }

    /// Register a closure receiving the payload of one event type, e.g.
    /// `subscribers.on(|ready: Ready| async move { .. })`
    pub fn on<T, F, Fut>(&self, f: F) -> SubscriptionId
    where
        T: TypedEvent,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(Some(T::KIND), false, Self::typed(f))
    }

    /// Like [on](Self::on), but the subscription is removed after first delivery
    pub fn once<T, F, Fut>(&self, f: F) -> SubscriptionId
    where
        T: TypedEvent,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(Some(T::KIND), true, Self::typed(f))
    }

    fn typed<T, F, Fut>(f: F) -> Arc<dyn Subscriber>
    where
        T: TypedEvent,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Typed {
            f,
            _payload: PhantomData,
        })
    }

    /// Remove a subscription, false if it does not exist
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;

        for list in slots.all_mut() {
            let before = list.len();
            list.retain(|slot| slot.id != id);
            removed |= list.len() != before;
        }

        removed
    }

    /// count of registered subscriptions
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.by_kind.values().map(Vec::len).sum::<usize>() + slots.any.len()
    }

    /// true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to the subscribers of its kind, then to catch-all ones
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();

        let targets: Vec<Arc<dyn Subscriber>> = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

            let mut targets = Vec::new();
            if let Some(list) = slots.by_kind.get_mut(&kind) {
                targets.extend(list.iter().map(|slot| slot.subscriber.clone()));
                list.retain(|slot| !slot.once);
            }
            targets.extend(slots.any.iter().map(|slot| slot.subscriber.clone()));
            slots.any.retain(|slot| !slot.once);

            targets
        };

        log::trace!("Dispatch {:?} event to {} subscribers", kind, targets.len());

        let event = Arc::new(event);
        for subscriber in targets {
            if self.sync {
                subscriber.on_event(event.clone()).await;
            } else {
                tokio::spawn(subscriber.on_event(event.clone()));
            }
        }
    }
}
