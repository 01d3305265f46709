//! Peer-to-peer side-channel messages and delta buffering
//!
//! The negotiated media path carries audio; this low-bandwidth structured
//! channel carries transcripts and control events. Unlike the streaming
//! backend, the remote party's transcript arrives as a stream of deltas with
//! a separate flush marker - the buffer here turns that cadence into exactly
//! one completed-utterance event per turn. Conflating the two backends'
//! cadences is how transcript lines get duplicated or truncated, so the
//! buffering lives in one tested place.

use serde::Deserialize;

/// Nested error payload on the side-channel
#[derive(Debug, Clone, Deserialize)]
pub struct SideChannelError {
    #[serde(default)]
    pub message: String,

    #[serde(rename = "type", default)]
    pub error_type: String,
}

/// Messages arriving on the side-channel, distinguished by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SideChannelMessage {
    /// Incremental fragment of the remote party's speech transcript
    #[serde(rename = "response.output_audio_transcript.delta")]
    TranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    /// Flush marker ending the remote party's turn. When the final text is
    /// present it is authoritative over the accumulated deltas.
    #[serde(rename = "response.output_audio_transcript.done")]
    TranscriptTurnDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// The local party's completed utterance, already final
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    LocalTranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "error")]
    Error { error: SideChannelError },

    #[serde(other)]
    Unknown,
}

/// Accumulates transcript deltas until the turn-done marker.
///
/// `flush` returns the turn's text exactly once; an empty turn (done with no
/// deltas and no final text) returns `None` so no blank line is appended.
#[derive(Debug, Default)]
pub struct DeltaBuffer {
    partial: String,
    delta_count: u64,
}

impl DeltaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.partial.push_str(delta);
        self.delta_count += 1;
    }

    /// Complete the turn. The done marker's final text wins over the
    /// accumulated deltas when both exist.
    pub fn flush(&mut self, final_text: Option<&str>) -> Option<String> {
        let text = match final_text {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => std::mem::take(&mut self.partial),
        };
        self.partial.clear();

        log::debug!(
            "Sidechannel: turn flushed after {} deltas ({} chars)",
            self.delta_count,
            text.len()
        );
        self.delta_count = 0;

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_flush_as_one_utterance() {
        let mut buffer = DeltaBuffer::new();
        buffer.push_delta("Hel");
        buffer.push_delta("lo the");
        buffer.push_delta("re");

        assert_eq!(buffer.flush(None), Some("Hello there".to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_is_exactly_once() {
        let mut buffer = DeltaBuffer::new();
        buffer.push_delta("Hello");

        assert_eq!(buffer.flush(None), Some("Hello".to_string()));
        // Second done marker without new deltas produces nothing
        assert_eq!(buffer.flush(None), None);
    }

    #[test]
    fn test_final_text_overrides_deltas() {
        let mut buffer = DeltaBuffer::new();
        buffer.push_delta("Helo wrld");

        assert_eq!(
            buffer.flush(Some("Hello world")),
            Some("Hello world".to_string())
        );
        // Stale partial must not leak into the next turn
        assert_eq!(buffer.flush(None), None);
    }

    #[test]
    fn test_empty_deltas_ignored() {
        let mut buffer = DeltaBuffer::new();
        buffer.push_delta("");
        buffer.push_delta("a");
        buffer.push_delta("");
        assert_eq!(buffer.flush(None), Some("a".to_string()));
    }

    #[test]
    fn test_delta_message_shapes() {
        let msg: SideChannelMessage = serde_json::from_str(
            r#"{"type":"response.output_audio_transcript.delta","delta":"Hel"}"#,
        )
        .unwrap();
        assert!(matches!(msg, SideChannelMessage::TranscriptDelta { delta } if delta == "Hel"));

        let msg: SideChannelMessage =
            serde_json::from_str(r#"{"type":"response.output_audio_transcript.done"}"#).unwrap();
        assert!(matches!(
            msg,
            SideChannelMessage::TranscriptTurnDone { transcript: None }
        ));

        let msg: SideChannelMessage = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"I felt it in my chest."}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            SideChannelMessage::LocalTranscriptCompleted { transcript }
                if transcript == "I felt it in my chest."
        ));
    }

    #[test]
    fn test_error_message_shape() {
        let msg: SideChannelMessage = serde_json::from_str(
            r#"{"type":"error","error":{"type":"session_error","message":"bad things"}}"#,
        )
        .unwrap();
        match msg {
            SideChannelMessage::Error { error } => assert_eq!(error.message, "bad things"),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let msg: SideChannelMessage =
            serde_json::from_str(r#"{"type":"output_audio_buffer.started"}"#).unwrap();
        assert!(matches!(msg, SideChannelMessage::Unknown));
    }
}
