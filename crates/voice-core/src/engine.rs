//! Signaling engine contract
//!
//! The controller never speaks SIP, ICE or RTP itself. It drives a signaling
//! engine through the traits in this module and listens to the callbacks the
//! engine raises.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  create_agent   ┌──────────────────────┐
//! │    CallController    │ ──────────────► │   SignalingEngine    │
//! │                      │                 └──────────┬───────────┘
//! │  AgentEventHandler ◄─┼── connected ────┐          │ builds
//! │                      │   new session   │ ┌────────▼───────────┐
//! │                      │ ── start/stop ──┼►│   SignalingAgent   │
//! │                      │ ── call ────────┘ └────────┬───────────┘
//! │                      │                            │ creates
//! │ SessionEventHandler ◄┼── progress/ended/...  ┌────▼───────────┐
//! │                      │ ── dtmf/mute/terminate►│  CallSession   │
//! │  TrackEventHandler  ◄┼── inbound track ──────┤ MediaConnection│
//! └──────────────────────┘                       └────────────────┘
//! ```
//!
//! Callbacks may be delivered from any thread and may be raised
//! synchronously from inside a call into the engine (for example, a new
//! outbound session is commonly announced from within
//! [`SignalingAgent::call`]). The controller never holds its own lock while
//! calling into the engine, so both styles are safe.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::Credential;
use crate::dtmf::{Dtmf, DtmfOptions};
use crate::error::BoxedCause;
use crate::media::MediaStream;

/// Identifier returned when registering a listener on a session or connection
pub type ListenerId = Uuid;

/// Everything an engine needs to build a registered agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Websocket endpoint of the signaling server
    ///
    /// As a [`Url`] this omits the scheme's default port and carries a `/`
    /// path (`wss://sip.example.com/`). Engines that take the endpoint as a
    /// string should use [`transport_endpoint`](Self::transport_endpoint).
    pub transport_uri: Url,
    /// Identity of the local user, `sip:<user>@<domain>`
    pub identity_uri: String,
    /// Bearer credential presented on registration
    pub credential: Credential,
    /// Register as soon as the agent starts
    pub register_on_start: bool,
    /// Enable engine wire-level tracing
    pub debug: bool,
}

impl AgentConfig {
    /// Endpoint with an explicit port and no path, e.g. `wss://sip.example.com:443`
    pub fn transport_endpoint(&self) -> String {
        let uri = &self.transport_uri;
        match (uri.host_str(), uri.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}://{host}:{port}", uri.scheme()),
            _ => uri.to_string(),
        }
    }
}

/// Factory for signaling agents
#[cfg_attr(test, mockall::automock)]
pub trait SignalingEngine: Send + Sync {
    /// Build an agent that reports its lifecycle to `events`
    fn create_agent(
        &self,
        config: AgentConfig,
        events: Arc<dyn AgentEventHandler>,
    ) -> Arc<dyn SignalingAgent>;
}

/// A registered client endpoint of the signaling protocol
pub trait SignalingAgent: Send + Sync {
    /// Connect and register; `on_connected` fires once the transport is up
    fn start(&self);

    /// Unregister and disconnect
    fn stop(&self);

    /// Replace the bearer credential on the live agent
    fn set_credential(&self, credential: &Credential);

    /// Place an outbound call
    ///
    /// The engine must register `options.event_handler` on the session it
    /// creates and announce that session through
    /// [`AgentEventHandler::on_new_session`].
    fn call(&self, target: &str, options: CallOptions);
}

/// Agent-level callbacks
pub trait AgentEventHandler: Send + Sync {
    /// The transport is connected
    fn on_connected(&self);

    /// A new inbound or outbound session exists
    fn on_new_session(&self, session: Arc<dyn CallSession>, direction: Originator);
}

/// One call's signaling handle
pub trait CallSession: Send + Sync {
    /// Engine-assigned identifier, stable for the life of the session
    fn id(&self) -> &str;

    /// Send one DTMF tone
    fn send_dtmf(&self, digit: Dtmf, options: &DtmfOptions) -> Result<(), BoxedCause>;

    /// Hang up (or cancel, if not yet answered)
    fn terminate(&self);

    /// Mute local audio
    fn mute(&self);

    /// Unmute local audio
    fn unmute(&self);

    /// Current local mute state
    fn is_muted(&self) -> MuteState;

    /// Register a listener for session events
    fn add_listener(&self, listener: Arc<dyn SessionEventHandler>) -> ListenerId;

    /// Remove a previously registered listener
    fn remove_listener(&self, id: ListenerId);

    /// The underlying media transport, once one exists
    fn connection(&self) -> Option<Arc<dyn MediaConnection>>;
}

/// Media transport of a session (the peer connection)
pub trait MediaConnection: Send + Sync {
    /// Register a listener for inbound tracks
    fn add_track_listener(&self, listener: Arc<dyn TrackEventHandler>) -> ListenerId;

    /// Remove a previously registered track listener
    fn remove_track_listener(&self, id: ListenerId);
}

/// Receives session events
pub trait SessionEventHandler: Send + Sync {
    /// Called for every event the session raises
    fn on_session_event(&self, event: &SessionEvent);
}

/// Receives inbound media tracks
pub trait TrackEventHandler: Send + Sync {
    /// A remote track arrived, associated with `streams`
    fn on_track(&self, streams: &[MediaStream]);
}

/// Options for an outbound call
#[derive(Clone)]
pub struct CallOptions {
    /// Listener the engine registers on the new session
    pub event_handler: Arc<dyn SessionEventHandler>,
    /// Which media to negotiate
    pub media: MediaConstraints,
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

/// Media to negotiate for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Negotiate audio
    pub audio: bool,
    /// Negotiate video
    pub video: bool,
}

impl MediaConstraints {
    /// Audio without video
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Local mute state reported by a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteState {
    /// Local audio is muted
    pub audio: bool,
    /// Local video is muted
    pub video: bool,
}

/// Which side produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Originator {
    /// This client
    Local,
    /// The far end
    Remote,
    /// The engine itself (timeouts, transport errors)
    System,
}

/// Provisional response received while the call is being set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Who sent it
    pub originator: Originator,
    /// SIP status code, e.g. 180 or 183
    pub status_code: u16,
    /// Reason phrase
    pub reason_phrase: Option<String>,
}

impl ProgressInfo {
    /// Remote end is alerting the callee
    pub fn is_remote_ringing(&self) -> bool {
        self.originator == Originator::Remote && self.status_code == 180
    }
}

/// The call was answered and acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedInfo {
    /// Who confirmed
    pub originator: Originator,
}

/// Why a session ended or failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndInfo {
    /// Who ended it
    pub originator: Originator,
    /// Engine cause string, e.g. "Busy" or "Canceled"
    pub cause: String,
    /// Final SIP status code, when there was one
    pub status_code: Option<u16>,
}

/// An in-dialog INFO message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    /// Who sent it
    pub originator: Originator,
    /// Content-Type of the body
    pub content_type: String,
    /// Message body
    pub body: String,
}

/// Low-level negotiation and media failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionFailure {
    /// Applying the remote description failed
    SetRemoteDescription,
    /// Creating the offer failed
    CreateOffer,
    /// Creating the answer failed
    CreateAnswer,
    /// Applying the local description failed
    SetLocalDescription,
    /// Acquiring the microphone failed
    MediaAcquisition,
}

impl SessionFailure {
    /// Every failure the controller subscribes to
    pub const ALL: [SessionFailure; 5] = [
        SessionFailure::SetRemoteDescription,
        SessionFailure::CreateOffer,
        SessionFailure::CreateAnswer,
        SessionFailure::SetLocalDescription,
        SessionFailure::MediaAcquisition,
    ];

    /// Event name as raised by browser-style engines
    pub fn event_name(self) -> &'static str {
        match self {
            SessionFailure::SetRemoteDescription => "peerconnection:setremotedescriptionfailed",
            SessionFailure::CreateOffer => "peerconnection:createofferfailed",
            SessionFailure::CreateAnswer => "peerconnection:createanswerfailed",
            SessionFailure::SetLocalDescription => "peerconnection:setlocaldescriptionfailed",
            SessionFailure::MediaAcquisition => "getusermediafailed",
        }
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionFailure::SetRemoteDescription => "setting the remote description failed",
            SessionFailure::CreateOffer => "creating the offer failed",
            SessionFailure::CreateAnswer => "creating the answer failed",
            SessionFailure::SetLocalDescription => "setting the local description failed",
            SessionFailure::MediaAcquisition => "acquiring local media failed",
        };
        f.write_str(text)
    }
}

/// Whatever the engine attached to a failure
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// A real error value
    Error(BoxedCause),
    /// Anything else, rendered as text
    Other(String),
}

/// Events raised by a [`CallSession`]
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Provisional response
    Progress(ProgressInfo),
    /// Call established
    Confirmed(ConfirmedInfo),
    /// Established call ended
    Ended(EndInfo),
    /// INFO received or sent
    NewInfo(InfoMessage),
    /// Call ended before it was established
    Failed(EndInfo),
    /// Negotiation or media failure
    Failure(SessionFailure, FailureCause),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_remote_180_counts_as_ringing() {
        let ringing = ProgressInfo {
            originator: Originator::Remote,
            status_code: 180,
            reason_phrase: Some("Ringing".into()),
        };
        assert!(ringing.is_remote_ringing());

        let early_media = ProgressInfo {
            status_code: 183,
            ..ringing.clone()
        };
        assert!(!early_media.is_remote_ringing());

        let local = ProgressInfo {
            originator: Originator::Local,
            ..ringing
        };
        assert!(!local.is_remote_ringing());
    }

    fn agent_config(transport: &str) -> AgentConfig {
        AgentConfig {
            transport_uri: Url::parse(transport).unwrap(),
            identity_uri: "sip:alice@sip.example.com".into(),
            credential: Credential::bearer("tok123"),
            register_on_start: true,
            debug: false,
        }
    }

    #[test]
    fn test_transport_endpoint_keeps_default_port() {
        let config = agent_config("wss://sip.example.com:443");
        assert_eq!(config.transport_uri.as_str(), "wss://sip.example.com/");
        assert_eq!(config.transport_endpoint(), "wss://sip.example.com:443");

        let config = agent_config("ws://sip.example.com:8080");
        assert_eq!(config.transport_endpoint(), "ws://sip.example.com:8080");
    }

    #[test]
    fn test_failure_event_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            SessionFailure::ALL.iter().map(|f| f.event_name()).collect();
        assert_eq!(names.len(), SessionFailure::ALL.len());
    }
}
