//! Session configuration
//!
//! Built once by the UI shell before a session starts and never mutated while
//! one is running - changing any setting means tearing the session down and
//! starting over with a fresh configuration.

use serde::{Deserialize, Serialize};

/// Spelling convention used in generated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spelling {
    Us,
    Uk,
}

/// Voice accent preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accent {
    Us,
    Uk,
}

/// Interview protocol depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewMode {
    Beginner,
    Advanced,
}

/// Which voice backend carries the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceProvider {
    StreamingModel,
    PeerToPeerRealtime,
}

/// Immutable input to one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub spelling: Spelling,
    pub accent: Accent,
    pub mode: InterviewMode,

    /// Slower pacing and additional ethical guardrails for sensitive topics.
    pub increased_sensitivity: bool,

    pub provider: VoiceProvider,

    /// Provider credential, opaque to this crate. May be empty; the
    /// streaming backend fails fast on an empty credential before any
    /// network attempt.
    pub credential: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spelling: Spelling::Us,
            accent: Accent::Us,
            mode: InterviewMode::Beginner,
            increased_sensitivity: false,
            provider: VoiceProvider::StreamingModel,
            credential: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn has_credential(&self) -> bool {
        !self.credential.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.provider, VoiceProvider::StreamingModel);
        assert_eq!(config.mode, InterviewMode::Beginner);
        assert!(!config.increased_sensitivity);
        assert!(!config.has_credential());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = SessionConfig {
            spelling: Spelling::Uk,
            accent: Accent::Uk,
            mode: InterviewMode::Advanced,
            increased_sensitivity: true,
            provider: VoiceProvider::PeerToPeerRealtime,
            credential: "k".to_string(),
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"provider\":\"peer_to_peer_realtime\""));

        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, InterviewMode::Advanced);
        assert!(back.has_credential());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"accent":"uk"}"#).unwrap();
        assert_eq!(config.accent, Accent::Uk);
        assert_eq!(config.spelling, Spelling::Us);
    }
}
