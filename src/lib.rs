//! Real-time voice session core for micro-phenomenology interviews.
//!
//! A UI shell constructs a [`config::SessionConfig`], hands it to a
//! [`session::SessionController`] together with a transport backend and a
//! microphone capture, and drives the session through
//! [`session::SessionControls`]. Captured audio flows controller → adapter →
//! remote while unmuted; synthesized speech and completed transcript turns
//! flow back, audio into the adapter's playback scheduler and transcript
//! lines into the append-only log. On explicit end the controller returns
//! the joined transcript and duration for downstream analysis.
//!
//! Two interchangeable backends implement [`transport::VoiceTransport`]:
//! a duplex streaming-model WebSocket ([`transport::StreamingTransport`])
//! and a brokered peer-to-peer WebRTC session
//! ([`transport::RealtimeTransport`]).

pub mod audio;
pub mod broker;
pub mod config;
pub mod prompt;
pub mod session;
pub mod transport;

pub use config::{Accent, InterviewMode, SessionConfig, Spelling, VoiceProvider};
pub use session::{SessionController, SessionControls, SessionOutcome};
