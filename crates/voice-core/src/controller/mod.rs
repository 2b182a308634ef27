//! Call-session controller
//!
//! [`CallController`] owns the client lifecycle, the credential, the single
//! active call session and the event bus. It drives a
//! [`SignalingEngine`](crate::engine::SignalingEngine) and republishes the
//! engine's callbacks as [`VoiceEvent`]s.
//!
//! # State machine
//!
//! ```text
//!            start() resolves             place_call()
//!  ┌─────────┐ ──────────────► ┌───────┐ ─────────────► ┌────────────────┐
//!  │ Stopped │                 │ Ready │                │ CallInProgress │
//!  └─────────┘ ◄────────────── └───────┘ ◄───────────── └────────────────┘
//!       ▲           stop()          ▲     ended / failed /       │
//!       │                           │     setup failure /        │
//!       └───────────── stop() ──────┼──── end_call() ────────────┘
//! ```
//!
//! | State          | Operations only allowed here |
//! |----------------|------------------------------|
//! | Stopped        | `set_user`                   |
//! | Ready          | `place_call`                 |
//! | CallInProgress | `toggle_mute`, `send_dtmf` (no-op elsewhere), `end_call` (no-op elsewhere) |
//!
//! # Threading
//!
//! All mutations go through one mutex. The controller never holds it while
//! calling into the engine or publishing an event, so engine callbacks and
//! event listeners may call back into the controller from any thread.
//!
//! # Known races
//!
//! `end_call()` moves to `Ready` immediately, while the session reference is
//! only dropped when the engine later reports `ended`. Until then the stale
//! session is still attached. Cleanup is idempotent and ignores sessions that
//! are no longer the active one.
//!
//! Engines may announce an outbound session after `call` returns. A call hung
//! up before its session arrives is remembered, and that session is
//! terminated on arrival instead of being attached.

mod session;


use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

use crate::config::{ClientConfig, Credential, ResolvedConfig};
use crate::dtmf::{Dtmf, DtmfOptions};
use crate::engine::{
    AgentConfig, CallOptions, CallSession, FailureCause, ListenerId, MediaConstraints,
    Originator, SessionFailure, SignalingAgent, SignalingEngine,
};
use crate::error::{CallError, VoiceError, VoiceResult};
use crate::events::{EventBus, SessionHandle, Topic, VoiceEvent, VoiceEventHandler};
use crate::media::AudioSink;

use self::session::{ActiveSession, AgentCallbacks, CallEventRelay, SessionWatcher, TrackRelay};

/// Lifecycle state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    /// No agent is running
    Stopped,
    /// The agent is connected and no call is active
    Ready,
    /// A call is being set up or is connected
    CallInProgress,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Stopped => "STOPPED",
            ClientState::Ready => "READY",
            ClientState::CallInProgress => "CALL_IN_PROGRESS",
        };
        f.write_str(name)
    }
}

/// Controller for a single-call SIP/WebRTC voice client
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_core::{CallController, ClientConfig};
/// use voice_core::engine::SignalingEngine;
///
/// async fn dial(engine: Arc<dyn SignalingEngine>) -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new()
///         .with_user("alice")
///         .with_signaling_host("sip.example.com")
///         .with_signaling_domain("sip.example.com")
///         .with_port(443);
///
///     let controller = CallController::new(config, engine)?;
///     controller.update_auth("tok123");
///     controller.start().await?;
///     controller.place_call("+15551234567")?;
///     Ok(())
/// }
/// ```
pub struct CallController {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    engine: Arc<dyn SignalingEngine>,
    bus: EventBus,
    core: Mutex<Core>,
}

struct Core {
    config: ResolvedConfig,
    credential: Option<Credential>,
    state: ClientState,
    agent: Option<Arc<dyn SignalingAgent>>,
    /// Bumped for every agent built; callbacks from older agents are ignored
    agent_generation: u64,
    pending_start: Option<oneshot::Sender<()>>,
    /// Bumped for every outbound call; relays of earlier calls go quiet
    call_generation: u64,
    /// Outbound calls whose session the engine has not announced yet, oldest first
    unannounced: VecDeque<OutboundCall>,
    active: Option<ActiveSession>,
    audio_sink: Option<ListenerId>,
}

/// An outbound call waiting for its session
struct OutboundCall {
    generation: u64,
    /// `end_call` ran before the session was announced
    hung_up: bool,
}

impl CallController {
    /// Create a stopped controller
    ///
    /// Fails with [`VoiceError::ProxyResolution`] when the signaling host or
    /// port is missing. A credential in `config` is stored bearer-wrapped.
    pub fn new(mut config: ClientConfig, engine: Arc<dyn SignalingEngine>) -> VoiceResult<Self> {
        let credential = config.credential.take().map(Credential::bearer);
        let config = ResolvedConfig::resolve(config)?;

        tracing::debug!(
            transport = %config.transport_uri,
            user = ?config.user(),
            domain = ?config.domain(),
            engine_debug = config.settings.is_debug(),
            "call controller configured"
        );

        let inner = Inner {
            engine,
            bus: EventBus::new(),
            core: Mutex::new(Core {
                config,
                credential,
                state: ClientState::Stopped,
                agent: None,
                agent_generation: 0,
                pending_start: None,
                call_generation: 0,
                unannounced: VecDeque::new(),
                active: None,
                audio_sink: None,
            }),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // ===== CONFIGURATION & CREDENTIALS =====

    /// Merge a partial configuration
    ///
    /// Like [`set_user`](Self::set_user), an update carrying a user is only
    /// accepted while stopped. The update is atomic: if the merged configuration cannot resolve a
    /// transport URI the previous configuration stays in place. Changes apply
    /// to the next agent built by [`start`](Self::start), except the
    /// credential, which is pushed into a running agent immediately.
    pub fn update_config(&self, mut update: ClientConfig) -> VoiceResult<()> {
        let token = update.credential.take();
        let (credential, agent) = {
            let mut core = self.inner.core.lock();
            if update.user.is_some() && core.state != ClientState::Stopped {
                return Err(VoiceError::invalid_state("setUser", core.state));
            }
            core.config = core.config.merged(update)?;
            match token {
                Some(token) => {
                    let credential = Credential::bearer(token);
                    core.credential = Some(credential.clone());
                    (Some(credential), core.agent.clone())
                }
                None => (None, None),
            }
        };

        if let (Some(credential), Some(agent)) = (credential, agent) {
            tracing::debug!("pushing updated credential into running agent");
            agent.set_credential(&credential);
        }
        Ok(())
    }

    /// Replace the authorization token
    ///
    /// Allowed in any state. A running agent receives the new credential
    /// without being restarted.
    pub fn update_auth(&self, token: impl Into<String>) {
        let credential = Credential::bearer(token);
        let agent = {
            let mut core = self.inner.core.lock();
            core.credential = Some(credential.clone());
            core.agent.clone()
        };

        match agent {
            Some(agent) => {
                tracing::debug!("pushing new credential into running agent");
                agent.set_credential(&credential);
            }
            None => tracing::debug!("credential stored for next agent"),
        }
    }

    /// Whether a credential has ever been set
    pub fn has_auth(&self) -> bool {
        self.inner.core.lock().credential.is_some()
    }

    /// Change the SIP user. Only allowed while stopped.
    pub fn set_user(&self, user: impl Into<String>) -> VoiceResult<()> {
        let mut core = self.inner.core.lock();
        if core.state != ClientState::Stopped {
            return Err(VoiceError::invalid_state("setUser", core.state));
        }
        core.config.settings.user = Some(user.into());
        Ok(())
    }

    /// Current configuration, without the credential
    pub fn config(&self) -> ClientConfig {
        self.inner.core.lock().config.settings.clone()
    }

    /// Resolved signaling transport URI
    pub fn transport_uri(&self) -> Url {
        self.inner.core.lock().config.transport_uri.clone()
    }

    // ===== EVENTS & AUDIO =====

    /// Listen to `topic` with a closure
    pub fn on<F>(&self, topic: Topic, handler: F) -> ListenerId
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(topic, handler)
    }

    /// Listen to `topic` with a handler object
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn VoiceEventHandler>) -> ListenerId {
        self.inner
            .bus
            .subscribe(crate::events::EventSubscription::new(topic, handler))
    }

    /// Remove a listener added with [`on`](Self::on) or [`subscribe`](Self::subscribe)
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// The event bus
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Play call audio through `sink`
    ///
    /// Works before any call exists: the sink is bound to every future
    /// `mediaStream`. Attaching another sink replaces this one.
    pub fn attach_audio_sink(&self, sink: Arc<dyn AudioSink>) -> VoiceResult<()> {
        if !sink.can_play_audio() {
            return Err(VoiceError::InvalidAudioSink);
        }

        let id = self.inner.bus.on(Topic::MediaStream, move |event| {
            if let VoiceEvent::MediaStream(stream) = event {
                sink.set_source(stream.clone());
                if let Err(e) = sink.play() {
                    tracing::warn!(stream = stream.id(), error = %e, "audio sink failed to start playback");
                }
            }
        });

        let previous = self.inner.core.lock().audio_sink.replace(id);
        if let Some(previous) = previous {
            tracing::debug!("replacing previously attached audio sink");
            self.inner.bus.unsubscribe(previous);
        }
        Ok(())
    }

    // ===== LIFECYCLE =====

    /// Build and start the signaling agent, then wait for connectivity
    ///
    /// Configuration problems fail immediately, before the engine is asked for
    /// an agent: [`VoiceError::MissingCredential`], [`VoiceError::MissingUser`]
    /// or [`VoiceError::ConfigurationDomain`].
    ///
    /// There is no internal timeout. Drop the future (for example through
    /// `tokio::time::timeout`) to stop waiting, or call [`stop`](Self::stop),
    /// which makes a pending `start` return
    /// `InvalidStateTransition("start", Stopped)`.
    ///
    /// Starting an already started controller is caller error; the previous
    /// agent is stopped and replaced.
    pub async fn start(&self) -> VoiceResult<()> {
        let connected = self.inner.launch_agent()?;
        match connected.await {
            Ok(()) => Ok(()),
            Err(_) => Err(VoiceError::invalid_state("start", self.current_state())),
        }
    }

    /// Tear down the agent and move to `Stopped`
    ///
    /// Any attached session is detached without being terminated; stopping
    /// the agent ends it on the engine side.
    pub fn stop(&self) {
        let (agent, active, pending) = {
            let mut core = self.inner.core.lock();
            core.unannounced.clear();
            (core.agent.take(), core.active.take(), core.pending_start.take())
        };

        if let Some(active) = active {
            active.detach();
        }
        match agent {
            Some(agent) => {
                tracing::info!("stopping signaling agent");
                agent.stop();
            }
            None => tracing::warn!("stop() called without a running agent"),
        }
        self.inner.set_state(ClientState::Stopped);
        // Wakes a pending start() only once the state reads Stopped
        drop(pending);
    }

    // ===== CALLS =====

    /// Call `destination` at the configured domain
    ///
    /// Moves to `CallInProgress` right away; ringing and answer arrive later as
    /// `callRinging` and `callConnected`.
    pub fn place_call(&self, destination: &str) -> VoiceResult<()> {
        let (agent, target, call_generation) = {
            let mut core = self.inner.core.lock();
            if core.state != ClientState::Ready {
                return Err(VoiceError::invalid_state("call", core.state));
            }
            let domain = core
                .config
                .domain()
                .filter(|d| !d.is_empty())
                .ok_or(VoiceError::ConfigurationDomain)?;
            let agent = core
                .agent
                .clone()
                .ok_or(VoiceError::invalid_state("call", core.state))?;
            let target = format!("sip:{destination}@{domain}");
            core.call_generation += 1;
            let generation = core.call_generation;
            core.unannounced.push_back(OutboundCall {
                generation,
                hung_up: false,
            });
            (agent, target, generation)
        };

        tracing::info!(%target, "placing call");
        self.inner.set_state(ClientState::CallInProgress);

        let options = CallOptions {
            event_handler: Arc::new(CallEventRelay::new(
                Arc::downgrade(&self.inner),
                call_generation,
            )),
            media: MediaConstraints::audio_only(),
        };
        agent.call(&target, options);
        Ok(())
    }

    /// Send a DTMF tone into the active call
    ///
    /// Does nothing without an active call. A send failure is published on
    /// `error`; `dtmfSent` is published either way.
    pub fn send_dtmf(&self, digit: Dtmf, options: &DtmfOptions) {
        let Some(session) = self.inner.active_call_session() else {
            return;
        };

        if let Err(source) = session.send_dtmf(digit, options) {
            tracing::warn!(%digit, error = %source, "DTMF send failed");
            self.inner
                .bus
                .publish(VoiceEvent::Error(CallError::Dtmf { digit, source }));
        }
        self.inner.bus.publish(VoiceEvent::DtmfSent(digit));
    }

    /// Hang up the active call
    ///
    /// Does nothing without an active call. Otherwise the session is
    /// terminated and the state returns to `Ready` without waiting for the
    /// engine's `ended` callback. If the engine has not announced the
    /// session of the latest call yet, it is terminated as soon as it is.
    pub fn end_call(&self) {
        let session = {
            let mut core = self.inner.core.lock();
            if core.state != ClientState::CallInProgress {
                return;
            }
            let latest = core.call_generation;
            let unannounced = core
                .unannounced
                .back()
                .is_some_and(|call| call.generation == latest);
            if unannounced {
                if let Some(call) = core.unannounced.back_mut() {
                    call.hung_up = true;
                }
                None
            } else {
                core.active.as_ref().map(|active| active.session.clone())
            }
        };

        match session {
            Some(session) => {
                tracing::info!(session = session.id(), "ending call");
                session.terminate();
            }
            None => tracing::debug!("ending call before the engine reported a session"),
        }
        self.inner.set_state(ClientState::Ready);
    }

    /// Flip the local mute state; returns `true` when now muted
    pub fn toggle_mute(&self) -> VoiceResult<bool> {
        let session = {
            let core = self.inner.core.lock();
            if core.state != ClientState::CallInProgress {
                return Err(VoiceError::invalid_state("toggleMute", core.state));
            }
            core.active.as_ref().map(|active| active.session.clone())
        };

        let Some(session) = session else {
            tracing::debug!("toggle_mute before the engine reported a session");
            return Ok(false);
        };

        if session.is_muted().audio {
            session.unmute();
            Ok(false)
        } else {
            session.mute();
            Ok(true)
        }
    }

    // ===== QUERIES =====

    /// Current state
    pub fn current_state(&self) -> ClientState {
        self.inner.core.lock().state
    }

    /// Configured SIP user
    pub fn current_user(&self) -> Option<String> {
        self.inner.core.lock().config.user().map(str::to_owned)
    }

    /// Whether the agent is running (any state but `Stopped`)
    pub fn is_ready(&self) -> bool {
        self.current_state() != ClientState::Stopped
    }

    /// Whether the controller is stopped
    pub fn is_stopped(&self) -> bool {
        self.current_state() == ClientState::Stopped
    }

    /// Whether a call is active
    pub fn has_active_call(&self) -> bool {
        self.current_state() == ClientState::CallInProgress
    }

    /// Whether local audio is muted; `false` without an active call
    pub fn is_muted(&self) -> bool {
        self.inner
            .active_call_session()
            .is_some_and(|session| session.is_muted().audio)
    }

    /// Id of the attached session, if any
    pub fn active_session_id(&self) -> Option<String> {
        self.inner
            .core
            .lock()
            .active
            .as_ref()
            .map(|active| active.session.id().to_owned())
    }
}

impl fmt::Debug for CallController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("CallController")
            .field("state", &core.state)
            .field("transport_uri", &core.config.transport_uri.as_str())
            .field("user", &core.config.user())
            .field("has_auth", &core.credential.is_some())
            .field(
                "active_session",
                &core.active.as_ref().map(|active| active.session.id()),
            )
            .finish()
    }
}

impl Core {
    /// Agent configuration from the current settings
    fn agent_config(&self) -> VoiceResult<AgentConfig> {
        let credential = self
            .credential
            .clone()
            .ok_or(VoiceError::MissingCredential)?;

        let user = match self.config.user() {
            Some(user) if !user.is_empty() => user,
            other => return Err(VoiceError::missing_user(other)),
        };

        let domain = self
            .config
            .domain()
            .filter(|d| !d.is_empty())
            .ok_or(VoiceError::ConfigurationDomain)?;

        Ok(AgentConfig {
            transport_uri: self.config.transport_uri.clone(),
            identity_uri: format!("sip:{user}@{domain}"),
            credential,
            register_on_start: true,
            debug: self.config.settings.is_debug(),
        })
    }
}

impl Inner {
    /// Set the state and publish `stateChange`, even when unchanged
    fn set_state(&self, current: ClientState) {
        let previous = std::mem::replace(&mut self.core.lock().state, current);
        if previous != current {
            tracing::info!(%previous, %current, "client state changed");
        }
        self.bus
            .publish(VoiceEvent::StateChange { previous, current });
    }

    /// Session of the active call, if a call is active and has a session
    fn active_call_session(&self) -> Option<Arc<dyn CallSession>> {
        let core = self.core.lock();
        if core.state != ClientState::CallInProgress {
            return None;
        }
        core.active.as_ref().map(|active| active.session.clone())
    }

    /// Validate configuration, build a new agent and start it
    fn launch_agent(self: &Arc<Self>) -> VoiceResult<oneshot::Receiver<()>> {
        let (agent_config, previous, generation, connected) = {
            let mut core = self.core.lock();
            let agent_config = core.agent_config()?;

            let previous = core.agent.take();
            core.unannounced.clear();
            core.agent_generation += 1;
            let (tx, rx) = oneshot::channel();
            core.pending_start = Some(tx);
            (agent_config, previous, core.agent_generation, rx)
        };

        if let Some(previous) = previous {
            tracing::warn!("start() called while an agent is running; stopping the previous agent");
            previous.stop();
        }

        tracing::info!(
            transport = %agent_config.transport_uri,
            identity = %agent_config.identity_uri,
            "starting signaling agent"
        );
        let callbacks = Arc::new(AgentCallbacks::new(Arc::downgrade(self), generation));
        let agent = self.engine.create_agent(agent_config, callbacks);

        // stop() or another start() may have run while the agent was built
        let cancelled = {
            let mut core = self.core.lock();
            let current = core.agent_generation == generation && core.pending_start.is_some();
            if current {
                core.agent = Some(agent.clone());
            }
            !current
        };
        if cancelled {
            tracing::warn!(generation, "agent launch cancelled before it started");
            agent.stop();
            return Ok(connected);
        }

        agent.start();
        Ok(connected)
    }

    /// Whether callbacks tagged with `generation` come from the running agent
    fn is_current_agent(core: &Core, generation: u64) -> bool {
        core.agent.is_some() && core.agent_generation == generation
    }

    fn handle_connected(&self, generation: u64) {
        let (pending, in_call) = {
            let mut core = self.core.lock();
            if !Self::is_current_agent(&core, generation) {
                tracing::debug!(generation, "ignoring connectivity from a replaced agent");
                return;
            }
            (
                core.pending_start.take(),
                core.state == ClientState::CallInProgress,
            )
        };

        if in_call {
            tracing::info!("signaling transport reconnected during a call");
        } else {
            self.set_state(ClientState::Ready);
        }
        if let Some(pending) = pending {
            let _ = pending.send(());
        }
    }

    /// Make `session` the active session and wire its callbacks
    fn attach_session(
        self: &Arc<Self>,
        generation: u64,
        session: Arc<dyn CallSession>,
        direction: Originator,
    ) {
        let hung_up = {
            let mut core = self.core.lock();
            if !Self::is_current_agent(&core, generation) {
                drop(core);
                tracing::warn!(
                    session = session.id(),
                    "ignoring session from an agent that is no longer running"
                );
                return;
            }
            // Outbound sessions are announced in the order the calls were placed
            direction == Originator::Local
                && core.unannounced.pop_front().is_some_and(|call| call.hung_up)
        };
        if hung_up {
            tracing::info!(
                session = session.id(),
                "terminating session of a call that was already hung up"
            );
            session.terminate();
            return;
        }

        let session_id = session.id().to_owned();
        tracing::debug!(session = %session_id, ?direction, "attaching session");

        let weak = Arc::downgrade(self);
        let listener = session.add_listener(Arc::new(SessionWatcher::new(
            weak.clone(),
            session_id.clone(),
        )));
        let track = session.connection().map(|connection| {
            let id = connection.add_track_listener(Arc::new(TrackRelay::new(weak)));
            (connection, id)
        });

        let active = ActiveSession {
            session: session.clone(),
            listener,
            track,
        };
        let previous = self.core.lock().active.replace(active);
        if let Some(previous) = previous {
            tracing::warn!(
                previous = previous.session.id(),
                session = %session_id,
                "new session arrived before the previous one was cleared; detaching it"
            );
            previous.detach();
        }

        self.bus
            .publish(VoiceEvent::Session(SessionHandle::new(session)));
    }

    /// Take the active session if it is `session_id`
    fn take_session(&self, session_id: &str) -> Option<ActiveSession> {
        let mut core = self.core.lock();
        match core.active.as_ref() {
            Some(active) if active.session.id() == session_id => core.active.take(),
            _ => None,
        }
    }

    fn handle_session_end(&self, session_id: &str) {
        match self.take_session(session_id) {
            Some(active) => {
                tracing::debug!(session = session_id, "session ended");
                active.detach();
                self.set_state(ClientState::Ready);
            }
            None => tracing::debug!(
                session = session_id,
                "ignoring end of a session that is no longer active"
            ),
        }
    }

    fn handle_session_failure(&self, session_id: &str, failure: SessionFailure, cause: &FailureCause) {
        let error = match cause {
            FailureCause::Error(source) => CallError::Session {
                failure,
                source: source.clone(),
            },
            FailureCause::Other(detail) => CallError::unknown(failure, detail.clone()),
        };
        tracing::error!(session = session_id, event = failure.event_name(), %error, "call setup failed");
        self.bus.publish(VoiceEvent::Error(error));

        match self.take_session(session_id) {
            Some(active) => {
                active.detach();
                self.set_state(ClientState::Ready);
            }
            None => tracing::debug!(
                session = session_id,
                "failure from a session that is no longer active"
            ),
        }
    }

    /// Whether `generation` is the most recently placed call
    fn is_current_call(&self, generation: u64) -> bool {
        self.core.lock().call_generation == generation
    }

    fn publish(&self, event: VoiceEvent) {
        self.bus.publish(event);
    }
}

/// Upgrade a weak controller reference held by a callback
fn upgrade(inner: &Weak<Inner>) -> Option<Arc<Inner>> {
    let upgraded = inner.upgrade();
    if upgraded.is_none() {
        tracing::trace!("controller dropped; ignoring engine callback");
    }
    upgraded
}
