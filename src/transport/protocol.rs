//! Streaming-model wire protocol
//!
//! JSON message types for the duplex speech-model channel. Client messages
//! configure the session and append captured audio; server messages carry
//! synthesized audio chunks, remote transcript done-segments, and turn
//! lifecycle markers, all distinguished by a `type` field.

use serde::{Deserialize, Serialize};

use crate::audio::codec::AudioFrame;

/// Streaming speech-model endpoint; the model is selected by query parameter
pub const STREAMING_MODEL_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

/// Session configuration sent immediately after connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSetup {
    /// Response modality - always audio for a voice interview
    pub modalities: Vec<String>,

    /// Named voice for synthesis
    pub voice: String,

    /// Opaque interview instructions
    pub instructions: String,

    /// Wire format of appended frames
    pub input_audio_format: String,

    /// Request a text transcript of the synthesized speech alongside the audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionSetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSetting {
    pub enabled: bool,
}

impl SessionSetup {
    pub fn for_interview(voice: &str, instructions: &str) -> Self {
        Self {
            modalities: vec!["audio".to_string()],
            voice: voice.to_string(),
            instructions: instructions.to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_transcription: Some(TranscriptionSetting { enabled: true }),
        }
    }
}

/// Session information returned by the remote side
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,

    #[serde(default)]
    pub model: String,
}

/// Error payload from the remote side
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client Messages (sent to the model)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSetup },

    /// One captured audio frame, already encoded per the wire codec
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },
}

impl ClientMessage {
    pub fn session_update(voice: &str, instructions: &str) -> Self {
        Self::SessionUpdate {
            session: SessionSetup::for_interview(voice, instructions),
        }
    }

    pub fn audio_append(frame: &AudioFrame) -> Self {
        Self::AudioAppend {
            audio: frame.data.clone(),
        }
    }
}

// ============================================================================
// Server Messages (received from the model)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    /// One chunk of synthesized speech, base64 PCM16 at the voice's native
    /// 24kHz rate
    #[serde(rename = "response.output_audio.delta")]
    AudioChunk { delta: String },

    /// Completed transcript segment of the remote party's speech. This
    /// backend delivers done-segments directly, never deltas.
    #[serde(rename = "response.output_audio_transcript.done")]
    TranscriptDone { transcript: String },

    /// Turn lifecycle marker
    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Catch-all so unknown message types never fail deserialization
    #[serde(other)]
    Unknown,
}
