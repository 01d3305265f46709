//! Interview instruction builder and voice mapping
//!
//! The instruction string is a deterministic function of the session
//! configuration: persona/accent block, spelling preference, the protocol
//! text for the chosen mode, and the pacing block when increased sensitivity
//! is on. The content itself is methodology material, passed opaquely to the
//! transport; nothing downstream parses it.
//!
//! Voice selection is a lookup table per backend, kept separate from the
//! persona text so either can change without touching the other.

use std::collections::HashMap;

use crate::config::{Accent, InterviewMode, SessionConfig, Spelling, VoiceProvider};

const PERSONA_US: &str = "You are a calm, attentive micro-phenomenology interviewer \
with a neutral American accent. Speak slowly and leave generous pauses.";

const PERSONA_UK: &str = "You are a calm, attentive micro-phenomenology interviewer \
with a neutral British accent. Speak slowly and leave generous pauses.";

const SPELLING_US: &str = "Use US English spelling in any text you produce.";
const SPELLING_UK: &str = "Use UK English spelling in any text you produce.";

const PROTOCOL_BEGINNER: &str = "Guide the interviewee through a single lived moment. \
Begin by helping them choose one specific, recent, concrete experience. Ask one short \
question at a time. Favour questions about what was sensed (seen, heard, felt) over \
why or what it meant. If the interviewee generalises, gently bring them back to the \
single moment. Never interpret or summarise their experience for them.";

const PROTOCOL_ADVANCED: &str = "Conduct a full evocation-based interview on a single \
lived moment. Establish the evocation state first, then unfold the moment's temporal \
phases before exploring any one instant across sensory modalities. Use strictly \
content-empty prompts. Track the interviewee's verbal tense as an indicator of \
evocation depth and re-anchor when they drift into commentary.";

const SENSITIVITY_BLOCK: &str = "The interviewee has indicated this may touch on \
sensitive material. Slow the pace further. Before deepening any line of questioning, \
check consent to continue. Offer an explicit exit at natural pauses and never press \
after a hesitation.";

/// Build the full instruction string for a session. Deterministic: equal
/// configurations produce equal instructions.
pub fn build_instructions(config: &SessionConfig) -> String {
    let persona = match config.accent {
        Accent::Us => PERSONA_US,
        Accent::Uk => PERSONA_UK,
    };
    let spelling = match config.spelling {
        Spelling::Us => SPELLING_US,
        Spelling::Uk => SPELLING_UK,
    };
    let protocol = match config.mode {
        InterviewMode::Beginner => PROTOCOL_BEGINNER,
        InterviewMode::Advanced => PROTOCOL_ADVANCED,
    };

    let mut sections = vec![persona, spelling, protocol];
    if config.increased_sensitivity {
        sections.push(SENSITIVITY_BLOCK);
    }
    sections.join("\n\n")
}

/// Accent → named voice, per backend. Swappable: the controller takes any
/// `VoiceMap`, and `VoiceMap::default()` carries the shipped table.
#[derive(Debug, Clone)]
pub struct VoiceMap {
    voices: HashMap<(VoiceProvider, Accent), &'static str>,
}

impl Default for VoiceMap {
    fn default() -> Self {
        let mut voices = HashMap::new();
        voices.insert((VoiceProvider::StreamingModel, Accent::Us), "Aoede");
        voices.insert((VoiceProvider::StreamingModel, Accent::Uk), "Charon");
        voices.insert((VoiceProvider::PeerToPeerRealtime, Accent::Us), "alloy");
        voices.insert((VoiceProvider::PeerToPeerRealtime, Accent::Uk), "ballad");
        Self { voices }
    }
}

impl VoiceMap {
    /// Look up the voice for a provider/accent pair. The shipped table is
    /// total over both enums; a custom map that misses a pair falls back to
    /// the streaming US voice.
    pub fn voice_for(&self, provider: VoiceProvider, accent: Accent) -> &'static str {
        self.voices
            .get(&(provider, accent))
            .copied()
            .unwrap_or("Aoede")
    }

    /// Replace the voice for one provider/accent pair.
    pub fn set(&mut self, provider: VoiceProvider, accent: Accent, voice: &'static str) {
        self.voices.insert((provider, accent), voice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_deterministic() {
        let config = SessionConfig::default();
        assert_eq!(build_instructions(&config), build_instructions(&config));
    }

    #[test]
    fn test_instructions_vary_with_mode() {
        let beginner = SessionConfig {
            mode: InterviewMode::Beginner,
            ..Default::default()
        };
        let advanced = SessionConfig {
            mode: InterviewMode::Advanced,
            ..Default::default()
        };
        assert_ne!(build_instructions(&beginner), build_instructions(&advanced));
        assert!(build_instructions(&advanced).contains("evocation"));
    }

    #[test]
    fn test_sensitivity_block_appended() {
        let plain = SessionConfig::default();
        let sensitive = SessionConfig {
            increased_sensitivity: true,
            ..Default::default()
        };
        assert!(!build_instructions(&plain).contains("check consent"));
        assert!(build_instructions(&sensitive).contains("check consent"));
    }

    #[test]
    fn test_uk_accent_and_spelling() {
        let config = SessionConfig {
            accent: Accent::Uk,
            spelling: Spelling::Uk,
            ..Default::default()
        };
        let instructions = build_instructions(&config);
        assert!(instructions.contains("British accent"));
        assert!(instructions.contains("UK English spelling"));
    }

    #[test]
    fn test_voice_map_two_voices_per_backend() {
        let map = VoiceMap::default();
        let streaming_us = map.voice_for(VoiceProvider::StreamingModel, Accent::Us);
        let streaming_uk = map.voice_for(VoiceProvider::StreamingModel, Accent::Uk);
        let realtime_us = map.voice_for(VoiceProvider::PeerToPeerRealtime, Accent::Us);
        let realtime_uk = map.voice_for(VoiceProvider::PeerToPeerRealtime, Accent::Uk);

        assert_ne!(streaming_us, streaming_uk);
        assert_ne!(realtime_us, realtime_uk);
    }

    #[test]
    fn test_voice_map_swappable() {
        let mut map = VoiceMap::default();
        map.set(VoiceProvider::StreamingModel, Accent::Us, "Puck");
        assert_eq!(map.voice_for(VoiceProvider::StreamingModel, Accent::Us), "Puck");
    }
}
