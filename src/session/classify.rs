//! Error classification for user-facing recovery guidance
//!
//! Every failure a session can hit is sorted into one of three categories,
//! each with a different corrective action: credential (reconfigure
//! settings), microphone (grant permission / check the device), or
//! network/session (retry). Classification is keyword-based, never throws,
//! and defaults to network when nothing matches.

/// The three diagnostic categories a failure can land in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCategory {
    Credential,
    Microphone,
    Network,
}

impl DiagnosticCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCategory::Credential => "credential",
            DiagnosticCategory::Microphone => "microphone",
            DiagnosticCategory::Network => "network",
        }
    }

    /// Short corrective guidance shown alongside the failure.
    pub fn guidance(&self) -> &'static str {
        match self {
            DiagnosticCategory::Credential => {
                "Check the provider credential in settings, then start a new session."
            }
            DiagnosticCategory::Microphone => {
                "Grant microphone permission or check that a microphone is connected."
            }
            DiagnosticCategory::Network => {
                "Connection problem. End the session and try again."
            }
        }
    }
}

const CREDENTIAL_KEYWORDS: &[&str] = &[
    "credential",
    "api key",
    "apikey",
    "token",
    "unauthorized",
    "authorization",
    "authentication",
    "forbidden",
    "401",
    "403",
];

const MICROPHONE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic ",
    "permission",
    "getusermedia",
    "input device",
    "notallowederror",
    "notfounderror",
    "capture",
];

/// Classify a raw error message. Pure, total, never panics.
pub fn classify(message: &str) -> (DiagnosticCategory, String) {
    let lower = message.to_lowercase();

    let category = if CREDENTIAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        DiagnosticCategory::Credential
    } else if MICROPHONE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        DiagnosticCategory::Microphone
    } else {
        DiagnosticCategory::Network
    };

    let detail = if message.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        message.trim().to_string()
    };

    (category, format!("{} {}", detail, category.guidance()))
}
