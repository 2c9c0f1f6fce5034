use serde::{Deserialize, Serialize};

/// Message delivered from the authorization callback to a waiting login
/// attempt. The serialized shape keeps the wallet's wire contract: a
/// `type` tag plus an optional human-readable `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CallbackMessage {
    #[serde(rename = "oauth_success")]
    Success,
    #[serde(rename = "oauth_error")]
    Error { message: Option<String> },
    #[serde(rename = "oauth_denied")]
    Denied,
}

/// Fired whenever the stored wallet session changes (sign-in, sign-out),
/// so listeners can re-check authentication state. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    StateChanged,
}
