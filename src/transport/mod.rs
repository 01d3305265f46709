//! Transport adapters for the live voice session
//!
//! Two independently-shaped backends, one contract. The streaming-model
//! adapter proxies audio frames over a duplex WebSocket; the peer-to-peer
//! adapter negotiates a WebRTC media session with a structured side-channel.
//! The session controller depends only on [`VoiceTransport`] /
//! [`TransportHandle`] and the [`TransportEvent`] stream - never on either
//! backend's message shapes.

pub mod protocol;
pub mod realtime;
pub mod sidechannel;
pub mod streaming;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::session::classify::DiagnosticCategory;

pub use realtime::RealtimeTransport;
pub use streaming::StreamingTransport;

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Ai,
    Interviewee,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Ai => "AI",
            Speaker::Interviewee => "Interviewee",
        }
    }
}

/// Events an adapter reports up to the controller
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel is open and the remote side is ready
    Opened,
    /// One completed utterance (adapters buffer deltas internally; a line is
    /// always a whole turn)
    TranscriptLine { speaker: Speaker, text: String },
    /// A single inbound message could not be parsed. Logged and dropped;
    /// never terminal for the session.
    ParseFailure { message: String },
    /// Transport-level failure. Terminal for this session attempt.
    Error { message: String },
    /// The transport has fully closed and released its resources. Sent
    /// exactly once per handle regardless of how close was reached.
    Closed,
}

/// Errors surfaced by adapters, tagged with a diagnostic category so the
/// controller can light the right slot without string-sniffing.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// No credential configured; raised before any network attempt
    MissingCredential,
    /// The provider or broker refused the credential
    CredentialRejected(String),
    /// Credential broker unreachable or returned a malformed response
    Broker(String),
    /// Microphone acquisition failed
    Microphone(String),
    /// Offer/answer negotiation failed
    Negotiation(String),
    /// Channel could not be established or dropped
    Connection(String),
    /// An outbound frame could not be sent
    Send(String),
}

impl TransportError {
    pub fn category(&self) -> DiagnosticCategory {
        match self {
            TransportError::MissingCredential
            | TransportError::CredentialRejected(_)
            | TransportError::Broker(_) => DiagnosticCategory::Credential,
            TransportError::Microphone(_) => DiagnosticCategory::Microphone,
            TransportError::Negotiation(_)
            | TransportError::Connection(_)
            | TransportError::Send(_) => DiagnosticCategory::Network,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::MissingCredential => {
                write!(f, "No provider credential configured")
            }
            TransportError::CredentialRejected(e) => write!(f, "Credential rejected: {}", e),
            TransportError::Broker(e) => write!(f, "Credential broker error: {}", e),
            TransportError::Microphone(e) => write!(f, "Microphone error: {}", e),
            TransportError::Negotiation(e) => write!(f, "Session negotiation failed: {}", e),
            TransportError::Connection(e) => write!(f, "Connection error: {}", e),
            TransportError::Send(e) => write!(f, "Failed to send audio: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Everything an adapter needs to open a session
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Provider credential (streaming backend) - may be empty for the
    /// peer-to-peer backend, which mints its own via the broker
    pub credential: String,
    /// Opaque interview instructions
    pub instructions: String,
    /// Named voice for the chosen backend
    pub voice: String,
}

/// Live handle to an open transport.
///
/// `close()` is idempotent: every associated resource is released exactly
/// once and `TransportEvent::Closed` fires exactly once, no matter how many
/// exit paths request it.
#[async_trait]
pub trait TransportHandle: Send {
    /// Transmit one batch of captured mono samples, immediately and in
    /// arrival order. The controller's mute gate sits above this call.
    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Factory seam for the two backends (and test doubles).
#[async_trait]
pub trait VoiceTransport: Send {
    /// Open a session. Events flow through `events` for the lifetime of the
    /// returned handle; an `Err` here means nothing was opened and nothing
    /// needs closing.
    async fn open(
        &mut self,
        request: OpenRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}
