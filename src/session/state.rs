//! Live session runtime state
//!
//! The mutable state the controller owns for one session attempt: the coarse
//! connection status shown to the shell, the per-category diagnostics record,
//! and the append-only transcript log. All transitions go through methods
//! here so the invariants (a failed slot forces ERROR, the session slot never
//! regresses from a terminal phase) hold no matter which code path fires.

use crate::session::classify::DiagnosticCategory;
use crate::transport::Speaker;

/// Fallback transcript handed to the caller when no utterances were captured
pub const EMPTY_TRANSCRIPT_PLACEHOLDER: &str = "(no transcript captured)";

/// Coarse shell-facing connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// State of the credential / microphone / network diagnostic slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Unknown,
    Checking,
    Ok,
    Fail,
}

/// The session slot has its own lifecycle: `Live`, `Error` and `Closed` are
/// terminal until a fresh session start resets the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Unknown,
    Checking,
    Live,
    Error,
    Closed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Live | SessionPhase::Error | SessionPhase::Closed
        )
    }
}

/// Per-category diagnostics plus a free-text status message
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub credential: SlotState,
    pub microphone: SlotState,
    pub network: SlotState,
    pub session: SessionPhase,
    pub status_message: String,
}

impl Diagnostics {
    fn slot_mut(&mut self, category: DiagnosticCategory) -> &mut SlotState {
        match category {
            DiagnosticCategory::Credential => &mut self.credential,
            DiagnosticCategory::Microphone => &mut self.microphone,
            DiagnosticCategory::Network => &mut self.network,
        }
    }

    pub fn slot(&self, category: DiagnosticCategory) -> SlotState {
        match category {
            DiagnosticCategory::Credential => self.credential,
            DiagnosticCategory::Microphone => self.microphone,
            DiagnosticCategory::Network => self.network,
        }
    }

    pub fn any_failed(&self) -> bool {
        self.credential == SlotState::Fail
            || self.microphone == SlotState::Fail
            || self.network == SlotState::Fail
            || self.session == SessionPhase::Error
    }
}

/// Ordered, append-only transcript of completed utterances.
///
/// Lines are appended in turn-completion order, which can differ from
/// conversational order when remote and local completion events interleave
/// under network delay. That is accepted, not corrected.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    lines: Vec<String>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, speaker: Speaker, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.lines.push(format!("{}: {}", speaker.label(), text));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Join the log into the single text block handed to the caller.
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            EMPTY_TRANSCRIPT_PLACEHOLDER.to_string()
        } else {
            self.lines.join("\n")
        }
    }
}

/// What a completed session hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub transcript: String,
    pub duration_seconds: u64,
}

/// Mutable runtime state for one live session attempt.
#[derive(Debug, Clone)]
pub struct LiveSessionState {
    pub connection_status: ConnectionStatus,
    /// Whole seconds since session start, ticked by the controller's timer
    pub elapsed_seconds: u64,
    /// While muted, capture continues but frames are not transmitted
    pub is_muted: bool,
    /// Input level for visualization only; carries no correctness weight
    pub mic_level: f32,
    pub diagnostics: Diagnostics,
    pub transcript: TranscriptLog,
}

impl Default for LiveSessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSessionState {
    /// Fresh state for a new session attempt: everything unknown, session
    /// slot entering `Checking` as setup begins.
    pub fn new() -> Self {
        Self {
            connection_status: ConnectionStatus::Connecting,
            elapsed_seconds: 0,
            is_muted: false,
            mic_level: 0.0,
            diagnostics: Diagnostics {
                session: SessionPhase::Checking,
                status_message: "Connecting...".to_string(),
                ..Diagnostics::default()
            },
            transcript: TranscriptLog::new(),
        }
    }

    /// Mark a diagnostic slot as in progress.
    pub fn mark_checking(&mut self, category: DiagnosticCategory) {
        *self.diagnostics.slot_mut(category) = SlotState::Checking;
    }

    /// Mark a diagnostic slot healthy.
    pub fn mark_ok(&mut self, category: DiagnosticCategory) {
        *self.diagnostics.slot_mut(category) = SlotState::Ok;
    }

    /// Session is open: status CONNECTED, session slot live. No-op if the
    /// session slot already reached a terminal phase (a late open must not
    /// overwrite an error or a close).
    pub fn mark_connected(&mut self) {
        if self.diagnostics.session.is_terminal() {
            return;
        }
        self.connection_status = ConnectionStatus::Connected;
        self.diagnostics.session = SessionPhase::Live;
        self.diagnostics.status_message = "Session live".to_string();
    }

    /// Record a failure: the category slot goes to fail, the session slot to
    /// error, and the coarse status to ERROR. `Live` is the one terminal
    /// phase a failure may still override; `Error` and `Closed` stick.
    pub fn record_failure(&mut self, category: DiagnosticCategory, message: &str) {
        if matches!(
            self.diagnostics.session,
            SessionPhase::Error | SessionPhase::Closed
        ) {
            log::debug!("Session: failure after terminal phase ignored: {}", message);
            return;
        }
        *self.diagnostics.slot_mut(category) = SlotState::Fail;
        self.diagnostics.session = SessionPhase::Error;
        self.diagnostics.status_message = message.to_string();
        self.connection_status = ConnectionStatus::Error;
    }

    /// Orderly close. Does not regress an error phase.
    pub fn mark_closed(&mut self) {
        if self.diagnostics.session == SessionPhase::Error {
            return;
        }
        self.diagnostics.session = SessionPhase::Closed;
    }

    /// True once the session slot reached any terminal phase.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.diagnostics.session,
            SessionPhase::Error | SessionPhase::Closed
        )
    }

    /// The outcome handed to the caller on explicit end.
    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            transcript: self.transcript.render(),
            duration_seconds: self.elapsed_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = LiveSessionState::new();
        assert_eq!(state.connection_status, ConnectionStatus::Connecting);
        assert_eq!(state.elapsed_seconds, 0);
        assert!(!state.is_muted);
        assert_eq!(state.diagnostics.session, SessionPhase::Checking);
        assert_eq!(state.diagnostics.credential, SlotState::Unknown);
    }

    #[test]
    fn test_failure_forces_error_status() {
        let mut state = LiveSessionState::new();
        state.record_failure(DiagnosticCategory::Credential, "Invalid API key");

        assert_eq!(state.diagnostics.credential, SlotState::Fail);
        assert_eq!(state.connection_status, ConnectionStatus::Error);
        assert_eq!(state.diagnostics.session, SessionPhase::Error);
        assert!(state.diagnostics.any_failed());
    }

    #[test]
    fn test_session_slot_does_not_regress_from_error() {
        let mut state = LiveSessionState::new();
        state.record_failure(DiagnosticCategory::Network, "connection lost");

        // Late open and late close both arrive after the error; neither wins
        state.mark_connected();
        assert_eq!(state.connection_status, ConnectionStatus::Error);
        assert_eq!(state.diagnostics.session, SessionPhase::Error);

        state.mark_closed();
        assert_eq!(state.diagnostics.session, SessionPhase::Error);
    }

    #[test]
    fn test_second_failure_does_not_overwrite_first() {
        let mut state = LiveSessionState::new();
        state.record_failure(DiagnosticCategory::Microphone, "permission denied");
        state.record_failure(DiagnosticCategory::Network, "socket closed");

        assert_eq!(state.diagnostics.microphone, SlotState::Fail);
        // The later failure was ignored entirely
        assert_eq!(state.diagnostics.network, SlotState::Unknown);
        assert_eq!(state.diagnostics.status_message, "permission denied");
    }

    #[test]
    fn test_failure_during_live_session_still_lands() {
        let mut state = LiveSessionState::new();
        state.mark_connected();
        assert_eq!(state.diagnostics.session, SessionPhase::Live);

        state.record_failure(DiagnosticCategory::Network, "disconnected");
        assert_eq!(state.connection_status, ConnectionStatus::Error);
        assert_eq!(state.diagnostics.session, SessionPhase::Error);
    }

    #[test]
    fn test_orderly_close() {
        let mut state = LiveSessionState::new();
        state.mark_connected();
        state.mark_closed();
        assert_eq!(state.diagnostics.session, SessionPhase::Closed);
        assert!(state.is_settled());
    }

    #[test]
    fn test_transcript_append_order_and_render() {
        let mut log = TranscriptLog::new();
        log.append(Speaker::Ai, "Tell me about that moment.");
        log.append(Speaker::Interviewee, "I was standing by the window.");
        log.append(Speaker::Ai, "What did you notice first?");

        assert_eq!(log.len(), 3);
        assert_eq!(
            log.render(),
            "AI: Tell me about that moment.\n\
             Interviewee: I was standing by the window.\n\
             AI: What did you notice first?"
        );
    }

    #[test]
    fn test_empty_transcript_placeholder() {
        let log = TranscriptLog::new();
        assert_eq!(log.render(), EMPTY_TRANSCRIPT_PLACEHOLDER);
    }

    #[test]
    fn test_blank_utterances_not_appended() {
        let mut log = TranscriptLog::new();
        log.append(Speaker::Ai, "   ");
        log.append(Speaker::Ai, "");
        assert!(log.is_empty());
        assert_eq!(log.render(), EMPTY_TRANSCRIPT_PLACEHOLDER);
    }

    #[test]
    fn test_outcome_carries_duration() {
        let mut state = LiveSessionState::new();
        state.elapsed_seconds = 42;
        state.transcript.append(Speaker::Ai, "Welcome.");

        let outcome = state.outcome();
        assert_eq!(outcome.duration_seconds, 42);
        assert_eq!(outcome.transcript, "AI: Welcome.");
    }
}
