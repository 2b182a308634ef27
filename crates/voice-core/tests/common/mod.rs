//! Scripted signaling engine shared by the integration tests
//!
//! Nothing happens on its own except what a test asks for: agents connect when
//! told to (or immediately with `auto_connect`), sessions raise exactly the
//! events a test emits.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use voice_core::engine::{
    AgentConfig, AgentEventHandler, CallOptions, CallSession, ConfirmedInfo, EndInfo,
    FailureCause, ListenerId, MediaConnection, MuteState, Originator, ProgressInfo,
    SessionEvent, SessionEventHandler, SessionFailure, SignalingAgent, SignalingEngine,
    TrackEventHandler,
};
use voice_core::error::BoxedCause;
use voice_core::{
    AudioSink, CallController, ClientConfig, Credential, Dtmf, DtmfOptions, MediaStream, Topic,
    VoiceEvent,
};

// ===== ENGINE =====

#[derive(Default)]
pub struct FakeEngine {
    auto_connect: bool,
    defer_sessions: bool,
    agents: Mutex<Vec<Arc<FakeAgent>>>,
}

impl FakeEngine {
    /// Agents wait for `FakeAgent::connect`
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Agents report connectivity as soon as they start
    pub fn auto_connecting() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            ..Default::default()
        })
    }

    /// Auto-connecting, but outbound sessions wait for
    /// `FakeAgent::announce_deferred` instead of being announced from `call`
    pub fn deferring() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            defer_sessions: true,
            ..Default::default()
        })
    }

    pub fn agent_count(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn last_agent(&self) -> Arc<FakeAgent> {
        self.agents
            .lock()
            .last()
            .cloned()
            .expect("no agent was created")
    }
}

impl SignalingEngine for FakeEngine {
    fn create_agent(
        &self,
        config: AgentConfig,
        events: Arc<dyn AgentEventHandler>,
    ) -> Arc<dyn SignalingAgent> {
        let agent = Arc::new(FakeAgent {
            config,
            events,
            auto_connect: self.auto_connect,
            defer_sessions: self.defer_sessions,
            deferred: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            credentials: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        });
        self.agents.lock().push(agent.clone());
        agent
    }
}

// ===== AGENT =====

pub struct FakeAgent {
    pub config: AgentConfig,
    events: Arc<dyn AgentEventHandler>,
    auto_connect: bool,
    defer_sessions: bool,
    deferred: Mutex<Vec<Arc<FakeSession>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    credentials: Mutex<Vec<Credential>>,
    calls: Mutex<Vec<(String, CallOptions)>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeAgent {
    pub fn connect(&self) {
        self.events.on_connected();
    }

    /// Announce an inbound session
    pub fn incoming(&self, id: &str) -> Arc<FakeSession> {
        let session = FakeSession::with_connection(id);
        self.sessions.lock().push(session.clone());
        self.events.on_new_session(session.clone(), Originator::Remote);
        session
    }

    /// Announce outbound sessions held back by a deferring engine
    pub fn announce_deferred(&self) {
        let sessions: Vec<_> = self.deferred.lock().drain(..).collect();
        for session in sessions {
            self.events.on_new_session(session, Originator::Local);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pushed_credentials(&self) -> Vec<String> {
        self.credentials
            .lock()
            .iter()
            .map(Credential::to_header_value)
            .collect()
    }

    pub fn call_targets(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn last_call_options(&self) -> CallOptions {
        self.calls
            .lock()
            .last()
            .map(|(_, options)| options.clone())
            .expect("no call was placed")
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session was created")
    }
}

impl SignalingAgent for FakeAgent {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        if self.auto_connect {
            self.events.on_connected();
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn set_credential(&self, credential: &Credential) {
        self.credentials.lock().push(credential.clone());
    }

    fn call(&self, target: &str, options: CallOptions) {
        let id = format!("out-{}", self.calls.lock().len() + 1);
        let session = FakeSession::with_connection(&id);
        session.add_listener(options.event_handler.clone());
        self.calls.lock().push((target.to_owned(), options));
        self.sessions.lock().push(session.clone());
        if self.defer_sessions {
            self.deferred.lock().push(session);
        } else {
            self.events.on_new_session(session, Originator::Local);
        }
    }
}

// ===== SESSION =====

pub struct FakeSession {
    id: String,
    muted: Mutex<bool>,
    terminated: AtomicUsize,
    dtmf_failure: Mutex<Option<String>>,
    dtmf_sent: Mutex<Vec<Dtmf>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn SessionEventHandler>)>>,
    connection: Option<Arc<FakeConnection>>,
}

impl FakeSession {
    pub fn with_connection(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, Some(Arc::new(FakeConnection::default()))))
    }

    pub fn without_connection(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, None))
    }

    fn build(id: &str, connection: Option<Arc<FakeConnection>>) -> Self {
        Self {
            id: id.to_owned(),
            muted: Mutex::new(false),
            terminated: AtomicUsize::new(0),
            dtmf_failure: Mutex::new(None),
            dtmf_sent: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            connection,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_session_event(&event);
        }
    }

    pub fn ring(&self) {
        self.emit(SessionEvent::Progress(ProgressInfo {
            originator: Originator::Remote,
            status_code: 180,
            reason_phrase: Some("Ringing".into()),
        }));
    }

    pub fn confirm(&self) {
        self.emit(SessionEvent::Confirmed(ConfirmedInfo {
            originator: Originator::Remote,
        }));
    }

    pub fn end(&self) {
        self.emit(SessionEvent::Ended(end_info("Terminated")));
    }

    pub fn fail_call(&self, cause: &str) {
        self.emit(SessionEvent::Failed(end_info(cause)));
    }

    pub fn fail(&self, failure: SessionFailure, cause: FailureCause) {
        self.emit(SessionEvent::Failure(failure, cause));
    }

    pub fn fail_dtmf_with(&self, message: &str) {
        *self.dtmf_failure.lock() = Some(message.to_owned());
    }

    pub fn dtmf_sent(&self) -> Vec<Dtmf> {
        self.dtmf_sent.lock().clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn fake_connection(&self) -> Option<Arc<FakeConnection>> {
        self.connection.clone()
    }
}

pub fn end_info(cause: &str) -> EndInfo {
    EndInfo {
        originator: Originator::Remote,
        cause: cause.to_owned(),
        status_code: None,
    }
}

impl CallSession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_dtmf(&self, digit: Dtmf, _options: &DtmfOptions) -> Result<(), BoxedCause> {
        if let Some(message) = self.dtmf_failure.lock().clone() {
            return Err(Arc::new(std::io::Error::other(message)));
        }
        self.dtmf_sent.lock().push(digit);
        Ok(())
    }

    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }

    fn mute(&self) {
        *self.muted.lock() = true;
    }

    fn unmute(&self) {
        *self.muted.lock() = false;
    }

    fn is_muted(&self) -> MuteState {
        MuteState {
            audio: *self.muted.lock(),
            video: false,
        }
    }

    fn add_listener(&self, listener: Arc<dyn SessionEventHandler>) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    fn connection(&self) -> Option<Arc<dyn MediaConnection>> {
        self.connection
            .clone()
            .map(|connection| connection as Arc<dyn MediaConnection>)
    }
}

// ===== MEDIA =====

#[derive(Default)]
pub struct FakeConnection {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn TrackEventHandler>)>>,
}

impl FakeConnection {
    pub fn track(&self, streams: &[MediaStream]) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_track(streams);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl MediaConnection for FakeConnection {
    fn add_track_listener(&self, listener: Arc<dyn TrackEventHandler>) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_track_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Audio sink that records what it was given
#[derive(Default)]
pub struct RecordingSink {
    pub refuses_audio: bool,
    pub fail_play: bool,
    pub sources: Mutex<Vec<String>>,
    pub plays: AtomicUsize,
}

impl RecordingSink {
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl AudioSink for RecordingSink {
    fn set_source(&self, stream: MediaStream) {
        self.sources.lock().push(stream.id().to_owned());
    }

    fn play(&self) -> Result<(), BoxedCause> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.fail_play {
            return Err(Arc::new(std::io::Error::other("autoplay blocked")));
        }
        Ok(())
    }

    fn can_play_audio(&self) -> bool {
        !self.refuses_audio
    }
}

// ===== EVENT RECORDING =====

/// Collects every event published on every topic
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<VoiceEvent>>>,
}

impl Recorder {
    pub fn attach(controller: &CallController) -> Self {
        let recorder = Self::default();
        for topic in Topic::ALL {
            let events = recorder.events.clone();
            controller.on(topic, move |event| events.lock().push(event.clone()));
        }
        recorder
    }

    pub fn events(&self) -> Vec<VoiceEvent> {
        self.events.lock().clone()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.events.lock().iter().map(VoiceEvent::topic).collect()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.topic() == topic)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

// ===== FIXTURES =====

/// Route controller logs to the test output; `RUST_LOG` overrides the filter
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// `alice` at `sip.example.com:443`, with a domain and a credential
pub fn alice_config() -> ClientConfig {
    ClientConfig::new()
        .with_user("alice")
        .with_signaling_host("sip.example.com")
        .with_signaling_domain("sip.example.com")
        .with_port(443)
        .with_credential("tok123")
}

/// A controller that has completed `start()`
pub async fn ready_controller() -> (CallController, Arc<FakeEngine>) {
    ready_controller_on(FakeEngine::auto_connecting()).await
}

/// A controller over `engine` that has completed `start()`; `engine` must auto-connect
pub async fn ready_controller_on(engine: Arc<FakeEngine>) -> (CallController, Arc<FakeEngine>) {
    init_tracing();
    let controller = CallController::new(alice_config(), engine.clone()).expect("valid config");
    controller.start().await.expect("start resolves");
    (controller, engine)
}

/// A controller with an outbound call placed to `+15551234567`
pub async fn calling_controller() -> (CallController, Arc<FakeEngine>, Arc<FakeSession>) {
    let (controller, engine) = ready_controller().await;
    controller.place_call("+15551234567").expect("call allowed");
    let session = engine.last_agent().last_session();
    (controller, engine, session)
}
