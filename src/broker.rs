//! Token/credential broker client for the peer-to-peer backend
//!
//! The browser-facing side of the system never holds long-lived realtime
//! secrets; a trusted backend mints a short-lived token plus the negotiation
//! URL on demand. This client does that mint and, as a second request, the
//! SDP offer/answer exchange against the minted URL.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default()
    })
}

/// Errors from the broker or the negotiation exchange
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// Broker or negotiation endpoint unreachable
    Unreachable(String),
    /// Non-2xx response, with the server's message when one was parseable
    Rejected { status: u16, message: String },
    /// 2xx but the body was not what the protocol promises
    MalformedResponse(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Unreachable(e) => write!(f, "Credential broker unreachable: {}", e),
            BrokerError::Rejected { status, message } => {
                write!(f, "Credential broker rejected request ({}): {}", status, message)
            }
            BrokerError::MalformedResponse(e) => {
                write!(f, "Malformed broker response: {}", e)
            }
        }
    }
}

impl std::error::Error for BrokerError {}

/// Short-lived connection credential plus where to negotiate with it
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeCredential {
    pub token: String,
    #[serde(rename = "callsUrl")]
    pub calls_url: String,
}

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    instructions: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct BrokerErrorBody {
    #[serde(default)]
    error: String,
}

/// Client for the credential broker endpoint.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    endpoint: String,
}

impl BrokerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Request a short-lived credential, supplying the interview instructions
    /// and desired voice as session context.
    pub async fn mint(
        &self,
        instructions: &str,
        voice: &str,
    ) -> Result<RealtimeCredential, BrokerError> {
        log::info!("Broker: requesting session credential");

        let response = get_http_client()
            .post(&self.endpoint)
            .json(&MintRequest {
                instructions,
                voice,
            })
            .send()
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<BrokerErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_default();
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let credential: RealtimeCredential = response
            .json()
            .await
            .map_err(|e| BrokerError::MalformedResponse(e.to_string()))?;

        if credential.token.is_empty() || credential.calls_url.is_empty() {
            return Err(BrokerError::MalformedResponse(
                "empty token or negotiation URL".to_string(),
            ));
        }

        Ok(credential)
    }

    /// Exchange the local offer for the remote answer: POST the SDP to the
    /// minted negotiation URL. Non-2xx or an empty body is a hard failure.
    pub async fn negotiate(
        &self,
        calls_url: &str,
        token: &str,
        offer_sdp: &str,
    ) -> Result<String, BrokerError> {
        log::info!("Broker: posting session offer for negotiation");

        let response = get_http_client()
            .post(calls_url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let answer = response
            .text()
            .await
            .map_err(|e| BrokerError::MalformedResponse(e.to_string()))?;

        if answer.trim().is_empty() {
            return Err(BrokerError::MalformedResponse(
                "empty negotiation answer".to_string(),
            ));
        }

        Ok(answer)
    }
}
