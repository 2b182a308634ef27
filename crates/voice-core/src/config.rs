//! Client configuration and credentials
//!
//! [`ClientConfig`] is a record of optional fields. It serves both as the
//! initial configuration handed to [`CallController::new`](crate::CallController::new)
//! and as a partial update: merging copies every `Some` field over the current
//! value and leaves `None` fields untouched.
//!
//! Applying a configuration resolves the signaling transport URI:
//!
//! ```text
//!   insecure_transport = false   ->  wss://<signaling_host>:<port>
//!   insecure_transport = true    ->  ws://<signaling_host>:<port>
//! ```
//!
//! # Examples
//!
//! ```rust
//! use voice_core::ClientConfig;
//!
//! let config = ClientConfig::new()
//!     .with_user("alice")
//!     .with_signaling_host("sip.example.com")
//!     .with_port(443)
//!     .with_signaling_domain("sip.example.com");
//!
//! let transport = config.transport_uri().unwrap();
//! assert_eq!(transport.as_str(), "wss://sip.example.com/");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{VoiceError, VoiceResult};

/// Controller configuration
///
/// All fields are optional so the same type can carry partial updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// SIP user part of the identity URI
    pub user: Option<String>,
    /// Raw authorization token, wrapped into a bearer credential when applied
    pub credential: Option<String>,
    /// Host of the signaling websocket endpoint
    pub signaling_host: Option<String>,
    /// SIP domain used for the identity URI and call targets
    pub signaling_domain: Option<String>,
    /// Port of the signaling websocket endpoint
    pub port: Option<u16>,
    /// Use `ws` instead of `wss`
    pub insecure_transport: Option<bool>,
    /// Ask the signaling engine for wire-level tracing
    pub debug: Option<bool>,
}

impl ClientConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing keys stay unset.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the SIP user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the raw authorization token
    pub fn with_credential(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(token.into());
        self
    }

    /// Set the signaling host
    pub fn with_signaling_host(mut self, host: impl Into<String>) -> Self {
        self.signaling_host = Some(host.into());
        self
    }

    /// Set the signaling domain
    pub fn with_signaling_domain(mut self, domain: impl Into<String>) -> Self {
        self.signaling_domain = Some(domain.into());
        self
    }

    /// Set the signaling port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Choose between `ws` (true) and `wss` (false)
    pub fn with_insecure_transport(mut self, insecure: bool) -> Self {
        self.insecure_transport = Some(insecure);
        self
    }

    /// Enable engine debug tracing
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Copy every set field of `update` over this configuration
    pub fn merge(&mut self, update: ClientConfig) {
        let ClientConfig {
            user,
            credential,
            signaling_host,
            signaling_domain,
            port,
            insecure_transport,
            debug,
        } = update;

        if user.is_some() {
            self.user = user;
        }
        if credential.is_some() {
            self.credential = credential;
        }
        if signaling_host.is_some() {
            self.signaling_host = signaling_host;
        }
        if signaling_domain.is_some() {
            self.signaling_domain = signaling_domain;
        }
        if port.is_some() {
            self.port = port;
        }
        if insecure_transport.is_some() {
            self.insecure_transport = insecure_transport;
        }
        if debug.is_some() {
            self.debug = debug;
        }
    }

    /// Whether plain `ws` is used
    pub fn is_insecure(&self) -> bool {
        self.insecure_transport.unwrap_or(false)
    }

    /// Whether engine debug tracing is requested
    pub fn is_debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Build the transport URI from host, port and scheme
    ///
    /// Fails with [`VoiceError::ProxyResolution`] when host or port is
    /// missing or the result is not a valid URI.
    pub fn transport_uri(&self) -> VoiceResult<Url> {
        let (Some(host), Some(port)) = (self.signaling_host.as_deref(), self.port) else {
            return Err(VoiceError::ProxyResolution);
        };
        if host.is_empty() {
            return Err(VoiceError::ProxyResolution);
        }

        let scheme = if self.is_insecure() { "ws" } else { "wss" };
        let uri = Url::parse(&format!("{scheme}://{host}:{port}"))
            .map_err(|_| VoiceError::ProxyResolution)?;

        // A host like "example.com/path" parses but is not a bare endpoint
        if uri.host_str().is_none() || uri.path() != "/" {
            return Err(VoiceError::ProxyResolution);
        }
        Ok(uri)
    }
}

/// Bearer credential presented to the signaling engine
///
/// The token is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wrap a raw token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The `Bearer <token>` form used for authorization
    pub fn to_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &"Bearer")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Configuration after a successful apply
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) settings: ClientConfig,
    pub(crate) transport_uri: Url,
}

impl ResolvedConfig {
    pub(crate) fn resolve(settings: ClientConfig) -> VoiceResult<Self> {
        let transport_uri = settings.transport_uri()?;
        Ok(Self {
            settings,
            transport_uri,
        })
    }

    /// Merge `update` and resolve again. `self` is untouched on failure.
    pub(crate) fn merged(&self, update: ClientConfig) -> VoiceResult<Self> {
        let mut settings = self.settings.clone();
        settings.merge(update);
        Self::resolve(settings)
    }

    pub(crate) fn user(&self) -> Option<&str> {
        self.settings.user.as_deref()
    }

    pub(crate) fn domain(&self) -> Option<&str> {
        self.settings.signaling_domain.as_deref()
    }
}
