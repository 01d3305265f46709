//! Session lifecycle: state, orchestration and error classification

pub mod classify;
pub mod controller;
pub mod state;

pub use classify::{classify, DiagnosticCategory};
pub use controller::{SessionCommand, SessionController, SessionControls};
pub use state::{
    ConnectionStatus, Diagnostics, LiveSessionState, SessionOutcome, SessionPhase, SlotState,
    TranscriptLog,
};
