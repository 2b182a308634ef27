//! Error types for the voice controller
//!
//! Two families live here:
//!
//! - [`VoiceError`] is the closed set of failures returned synchronously by
//!   [`CallController`](crate::CallController) operations. None of them are
//!   retried internally.
//! - [`CallError`] describes failures that the signaling engine reports
//!   asynchronously while a call is being set up or is running. These are never
//!   returned from an operation; the controller publishes them on the `error`
//!   topic instead.

use std::sync::Arc;

use thiserror::Error;

use crate::controller::ClientState;
use crate::dtmf::Dtmf;
use crate::engine::SessionFailure;

/// Result type for controller operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Shared, thread-safe error value reported by a signaling engine
pub type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned synchronously by the controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// The attach target cannot play audio
    #[error("Audio sink must be a playable audio media element")]
    InvalidAudioSink,

    /// An agent was requested before any credential was set
    #[error("Authorization token must be set")]
    MissingCredential,

    /// The operation is not allowed in the current client state
    #[error("{operation} not allowed in state {current_state}")]
    InvalidStateTransition {
        /// Name of the rejected operation
        operation: &'static str,
        /// State the controller was in when the operation was attempted
        current_state: ClientState,
    },

    /// An agent was requested without a usable user identity
    #[error("User {} is invalid", .user.as_deref().unwrap_or("<unset>"))]
    MissingUser {
        /// The configured user, if any
        user: Option<String>,
    },

    /// The transport URI cannot be built from host and port
    #[error("The proxy URI can not be set. Make sure to define signaling host and port")]
    ProxyResolution,

    /// A call or agent was requested without a signaling domain
    #[error("Invalid domain")]
    ConfigurationDomain,
}

impl VoiceError {
    /// Create an invalid state transition error
    pub fn invalid_state(operation: &'static str, current_state: ClientState) -> Self {
        Self::InvalidStateTransition {
            operation,
            current_state,
        }
    }

    /// Create a missing user error
    pub fn missing_user(user: Option<&str>) -> Self {
        Self::MissingUser {
            user: user.map(str::to_owned),
        }
    }

    /// Whether this error comes from incomplete configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::MissingUser { .. }
                | Self::ProxyResolution
                | Self::ConfigurationDomain
        )
    }
}

/// Asynchronous call failures published on the `error` topic
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The engine reported a negotiation or media failure with an error value
    #[error("{failure} during the call: {source}")]
    Session {
        /// Which low-level failure fired
        failure: SessionFailure,
        /// The underlying error
        #[source]
        source: BoxedCause,
    },

    /// The engine reported a failure whose cause was not an error value
    #[error("An unknown error occurred during the call: {detail}")]
    Unknown {
        /// Which low-level failure fired
        failure: SessionFailure,
        /// Textual rendering of whatever the engine supplied
        detail: String,
    },

    /// Sending a DTMF tone failed; the call itself is unaffected
    #[error("Failed to send DTMF {digit}: {source}")]
    Dtmf {
        /// The digit that could not be sent
        digit: Dtmf,
        /// The underlying error
        #[source]
        source: BoxedCause,
    },
}

impl CallError {
    /// Create an unknown session failure
    pub fn unknown(failure: SessionFailure, detail: impl Into<String>) -> Self {
        Self::Unknown {
            failure,
            detail: detail.into(),
        }
    }

    /// The session failure kind, if this error came from one
    pub fn session_failure(&self) -> Option<SessionFailure> {
        match self {
            Self::Session { failure, .. } | Self::Unknown { failure, .. } => Some(*failure),
            Self::Dtmf { .. } => None,
        }
    }
}
