//! Consumer-facing events and the in-process event bus
//!
//! The controller republishes everything the signaling engine reports as a
//! small, stable set of named topics:
//!
//! | Topic           | Payload                                   |
//! |-----------------|-------------------------------------------|
//! | `session`       | [`SessionHandle`] of the new session      |
//! | `mediaStream`   | remote [`MediaStream`]                    |
//! | `dtmfSent`      | the [`Dtmf`] tone                         |
//! | `stateChange`   | previous and current [`ClientState`]      |
//! | `callRinging`   | [`ProgressInfo`] of the 180 response      |
//! | `callConnected` | [`ConfirmedInfo`]                         |
//! | `hangup`        | [`EndInfo`]                               |
//! | `info`          | remote [`InfoMessage`]                    |
//! | `callFailed`    | [`EndInfo`]                               |
//! | `error`         | [`CallError`]                             |
//!
//! # Delivery
//!
//! Dispatch is synchronous: every listener of a topic runs inline with
//! [`EventBus::publish`], in the order it subscribed. Listeners may subscribe,
//! unsubscribe, publish or call back into the controller from inside a
//! callback; a publish works on a snapshot of the listeners taken when it
//! starts. Listeners are never removed automatically.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use voice_core::events::{EventBus, Topic, VoiceEvent};
//! use voice_core::ClientState;
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let id = bus.on(Topic::StateChange, move |_event: &VoiceEvent| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.publish(VoiceEvent::StateChange {
//!     previous: ClientState::Stopped,
//!     current: ClientState::Ready,
//! });
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//!
//! assert!(bus.unsubscribe(id));
//! assert_eq!(bus.listener_count(Topic::StateChange), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::ClientState;
use crate::dtmf::Dtmf;
use crate::engine::{CallSession, ConfirmedInfo, EndInfo, InfoMessage, ListenerId, ProgressInfo};
use crate::error::CallError;
use crate::media::MediaStream;

/// Named event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A new session was attached
    Session,
    /// Remote media arrived
    MediaStream,
    /// A DTMF tone was handed to the session
    DtmfSent,
    /// The client state was set
    StateChange,
    /// The remote end is ringing
    CallRinging,
    /// The call was answered
    CallConnected,
    /// The call ended
    Hangup,
    /// The remote end sent an INFO message
    Info,
    /// The call could not be established
    CallFailed,
    /// An asynchronous failure occurred
    Error,
}

impl Topic {
    /// Every topic, in declaration order
    pub const ALL: [Topic; 10] = [
        Topic::Session,
        Topic::MediaStream,
        Topic::DtmfSent,
        Topic::StateChange,
        Topic::CallRinging,
        Topic::CallConnected,
        Topic::Hangup,
        Topic::Info,
        Topic::CallFailed,
        Topic::Error,
    ];

    /// Wire name of the topic
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Session => "session",
            Topic::MediaStream => "mediaStream",
            Topic::DtmfSent => "dtmfSent",
            Topic::StateChange => "stateChange",
            Topic::CallRinging => "callRinging",
            Topic::CallConnected => "callConnected",
            Topic::Hangup => "hangup",
            Topic::Info => "info",
            Topic::CallFailed => "callFailed",
            Topic::Error => "error",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_owned()))
    }
}

/// A topic name that is not part of the event contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event topic: {0}")]
pub struct UnknownTopic(pub String);

/// Cloneable handle to a signaling session, as carried by `session` events
#[derive(Clone)]
pub struct SessionHandle(Arc<dyn CallSession>);

impl SessionHandle {
    pub(crate) fn new(session: Arc<dyn CallSession>) -> Self {
        Self(session)
    }

    /// Engine-assigned session id
    pub fn id(&self) -> &str {
        self.0.id()
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<dyn CallSession> {
        &self.0
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.id()).finish()
    }
}

/// An event published by the controller
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// A session was attached
    Session(SessionHandle),
    /// Remote media is available
    MediaStream(MediaStream),
    /// A DTMF tone was sent (or attempted)
    DtmfSent(Dtmf),
    /// The client state was set
    StateChange {
        /// State before the change
        previous: ClientState,
        /// State after the change
        current: ClientState,
    },
    /// The remote end is ringing
    CallRinging(ProgressInfo),
    /// The call was answered
    CallConnected(ConfirmedInfo),
    /// The call ended
    Hangup(EndInfo),
    /// INFO from the remote end
    Info(InfoMessage),
    /// The call failed before it was established
    CallFailed(EndInfo),
    /// Asynchronous failure
    Error(CallError),
}

impl VoiceEvent {
    /// The topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            VoiceEvent::Session(_) => Topic::Session,
            VoiceEvent::MediaStream(_) => Topic::MediaStream,
            VoiceEvent::DtmfSent(_) => Topic::DtmfSent,
            VoiceEvent::StateChange { .. } => Topic::StateChange,
            VoiceEvent::CallRinging(_) => Topic::CallRinging,
            VoiceEvent::CallConnected(_) => Topic::CallConnected,
            VoiceEvent::Hangup(_) => Topic::Hangup,
            VoiceEvent::Info(_) => Topic::Info,
            VoiceEvent::CallFailed(_) => Topic::CallFailed,
            VoiceEvent::Error(_) => Topic::Error,
        }
    }
}

/// Receives events from the bus
pub trait VoiceEventHandler: Send + Sync {
    /// Called once per published event on the subscribed topic
    fn on_event(&self, event: &VoiceEvent);
}

impl<F> VoiceEventHandler for F
where
    F: Fn(&VoiceEvent) + Send + Sync,
{
    fn on_event(&self, event: &VoiceEvent) {
        self(event)
    }
}

/// One listener registration
#[derive(Clone)]
pub struct EventSubscription {
    id: ListenerId,
    topic: Topic,
    handler: Arc<dyn VoiceEventHandler>,
}

impl EventSubscription {
    /// New subscription with a fresh id
    pub fn new(topic: Topic, handler: Arc<dyn VoiceEventHandler>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            handler,
        }
    }

    /// Subscription id
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Subscribed topic
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Topic-keyed publish/subscribe hub
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<Topic, Vec<EventSubscription>>>,
}

impl EventBus {
    /// Bus with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; returns its id
    pub fn subscribe(&self, subscription: EventSubscription) -> ListenerId {
        let id = subscription.id();
        self.subscriptions
            .write()
            .entry(subscription.topic())
            .or_default()
            .push(subscription);
        id
    }

    /// Register a closure for `topic`
    pub fn on<F>(&self, topic: Topic, handler: F) -> ListenerId
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventSubscription::new(topic, Arc::new(handler)))
    }

    /// Remove a subscription. Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        for listeners in subscriptions.values_mut() {
            if let Some(pos) = listeners.iter().position(|s| s.id() == id) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every listener of its topic, in subscription order
    pub fn publish(&self, event: VoiceEvent) {
        let topic = event.topic();
        let listeners = match self.subscriptions.read().get(&topic) {
            Some(listeners) => listeners.clone(),
            None => Vec::new(),
        };

        tracing::debug!(%topic, listeners = listeners.len(), "publishing event");
        for subscription in listeners {
            subscription.handler.on_event(&event);
        }
    }

    /// Number of listeners on `topic`
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.subscriptions.read().get(&topic).map_or(0, Vec::len)
    }

    /// Number of listeners across all topics
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }
}
