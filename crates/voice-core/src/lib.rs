//! # voice-core - call-session controller for SIP/WebRTC voice clients
//!
//! This crate sits between an application and a SIP/WebRTC signaling engine.
//! It provides:
//!
//! - **A client state machine**: `Stopped` → `Ready` → `CallInProgress`, with
//!   operations gated on the current state
//! - **Credential rotation**: bearer tokens can be replaced at any time and are
//!   pushed into a running agent without a restart
//! - **One active call**: the controller owns at most one session and resets
//!   to a safe state when the call ends or its setup fails
//! - **Audio output**: an [`AudioSink`] is bound to remote media as it arrives
//! - **A stable event contract**: engine callbacks are republished on ten
//!   named [`Topic`]s
//!
//! The engine itself (SIP transport, offer/answer, ICE, RTP) is external and
//! plugged in through the traits in [`engine`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_core::{CallController, ClientConfig, Topic, VoiceEvent};
//! use voice_core::engine::SignalingEngine;
//!
//! async fn run(engine: Arc<dyn SignalingEngine>) -> Result<(), voice_core::VoiceError> {
//!     let controller = CallController::new(
//!         ClientConfig::new()
//!             .with_user("alice")
//!             .with_signaling_host("sip.example.com")
//!             .with_signaling_domain("sip.example.com")
//!             .with_port(443)
//!             .with_credential("tok123"),
//!         engine,
//!     )?;
//!
//!     controller.on(Topic::CallConnected, |event: &VoiceEvent| {
//!         println!("connected: {event:?}");
//!     });
//!
//!     controller.start().await?;
//!     controller.place_call("+15551234567")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod dtmf;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;

pub use config::{ClientConfig, Credential};
pub use controller::{CallController, ClientState};
pub use dtmf::{Dtmf, DtmfOptions, DtmfTransport};
pub use error::{CallError, VoiceError, VoiceResult};
pub use events::{EventBus, SessionHandle, Topic, VoiceEvent, VoiceEventHandler};
pub use media::{AudioSink, MediaStream};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
