//! Engine callback adapters
//!
//! Each engine-facing listener holds a weak reference to the controller so an
//! engine that outlives the controller never keeps it alive.

use std::sync::{Arc, Weak};

use crate::engine::{
    AgentEventHandler, CallSession, ListenerId, MediaConnection, Originator, SessionEvent,
    SessionEventHandler, TrackEventHandler,
};
use crate::events::VoiceEvent;
use crate::media::MediaStream;

use super::{upgrade, Inner};

/// The session the controller currently owns, with the listeners it registered
pub(super) struct ActiveSession {
    pub(super) session: Arc<dyn CallSession>,
    pub(super) listener: ListenerId,
    pub(super) track: Option<(Arc<dyn MediaConnection>, ListenerId)>,
}

impl ActiveSession {
    /// Remove every listener the controller registered on this session
    pub(super) fn detach(self) {
        self.session.remove_listener(self.listener);
        if let Some((connection, id)) = self.track {
            connection.remove_track_listener(id);
        }
    }
}

/// Agent lifecycle callbacks for one agent generation
pub(super) struct AgentCallbacks {
    inner: Weak<Inner>,
    generation: u64,
}

impl AgentCallbacks {
    pub(super) fn new(inner: Weak<Inner>, generation: u64) -> Self {
        Self { inner, generation }
    }
}

impl AgentEventHandler for AgentCallbacks {
    fn on_connected(&self) {
        if let Some(inner) = upgrade(&self.inner) {
            inner.handle_connected(self.generation);
        }
    }

    fn on_new_session(&self, session: Arc<dyn CallSession>, direction: Originator) {
        if let Some(inner) = upgrade(&self.inner) {
            inner.attach_session(self.generation, session, direction);
        }
    }
}

/// Lifecycle listener registered on every attached session
///
/// Turns negotiation failures into `error` events and resets the controller
/// when the session ends or fails.
pub(super) struct SessionWatcher {
    inner: Weak<Inner>,
    session_id: String,
}

impl SessionWatcher {
    pub(super) fn new(inner: Weak<Inner>, session_id: String) -> Self {
        Self { inner, session_id }
    }
}

impl SessionEventHandler for SessionWatcher {
    fn on_session_event(&self, event: &SessionEvent) {
        let Some(inner) = upgrade(&self.inner) else {
            return;
        };
        match event {
            SessionEvent::Failure(failure, cause) => {
                inner.handle_session_failure(&self.session_id, *failure, cause);
            }
            // A failed call never reaches `ended`, so both count as termination
            SessionEvent::Ended(_) | SessionEvent::Failed(_) => {
                inner.handle_session_end(&self.session_id);
            }
            SessionEvent::Progress(_) | SessionEvent::Confirmed(_) | SessionEvent::NewInfo(_) => {}
        }
    }
}

/// Call handlers passed with an outbound call; republishes call progress
///
/// Once a newer call has been placed, events from this call are dropped.
pub(super) struct CallEventRelay {
    inner: Weak<Inner>,
    call_generation: u64,
}

impl CallEventRelay {
    pub(super) fn new(inner: Weak<Inner>, call_generation: u64) -> Self {
        Self {
            inner,
            call_generation,
        }
    }
}

impl SessionEventHandler for CallEventRelay {
    fn on_session_event(&self, event: &SessionEvent) {
        let Some(inner) = upgrade(&self.inner) else {
            return;
        };
        if !inner.is_current_call(self.call_generation) {
            tracing::debug!(call = self.call_generation, "dropping event from a superseded call");
            return;
        }
        let published = match event {
            SessionEvent::Progress(progress) if progress.is_remote_ringing() => {
                VoiceEvent::CallRinging(progress.clone())
            }
            SessionEvent::Confirmed(confirmed) => VoiceEvent::CallConnected(confirmed.clone()),
            SessionEvent::Ended(end) => VoiceEvent::Hangup(end.clone()),
            SessionEvent::NewInfo(info) if info.originator == Originator::Remote => {
                VoiceEvent::Info(info.clone())
            }
            SessionEvent::Failed(end) => VoiceEvent::CallFailed(end.clone()),
            _ => return,
        };
        inner.publish(published);
    }
}

/// Inbound track listener; republishes the first stream of each track
pub(super) struct TrackRelay {
    inner: Weak<Inner>,
}

impl TrackRelay {
    pub(super) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }
}

impl TrackEventHandler for TrackRelay {
    fn on_track(&self, streams: &[MediaStream]) {
        let Some(inner) = upgrade(&self.inner) else {
            return;
        };
        match streams.first() {
            Some(stream) => inner.publish(VoiceEvent::MediaStream(stream.clone())),
            None => tracing::debug!("inbound track without an associated stream"),
        }
    }
}
