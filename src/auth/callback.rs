use crate::auth::flow::LoginBroker;
use crate::models::CallbackMessage;
use anyhow::{anyhow, Result};
use tracing::{info, warn};
use url::Url;

/// Query parameters the wallet appends to the redirect URI.
#[derive(Debug, Default, Clone)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Parse a pasted redirect URL into its callback parameters. Unknown
/// query keys are ignored.
pub fn parse_redirect_url(input: &str) -> Result<CallbackParams> {
    let parsed =
        Url::parse(input.trim()).map_err(|e| anyhow!("invalid redirect URL pasted: {}", e))?;
    let mut params = CallbackParams::default();
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            "error_description" => params.error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(params)
}

impl LoginBroker {
    /// Complete a sign-in from the redirect URL the wallet sent the user
    /// back with. Validates the `state` against the pending handshake
    /// before anything else; the authorization code is only exchanged once
    /// that check passes, and the verifier is transmitted exactly there.
    /// Outcomes are announced on the callback bus so the waiting login
    /// attempt resolves.
    pub async fn complete_authorization(&self, redirect_url: &str) -> Result<()> {
        let params = parse_redirect_url(redirect_url)?;

        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            if error == "access_denied" {
                info!("wallet reported access_denied");
                self.bus.publish_callback(CallbackMessage::Denied);
            } else {
                warn!("wallet returned error '{}': {}", error, description);
                let message = if description.is_empty() {
                    error
                } else {
                    description
                };
                self.bus.publish_callback(CallbackMessage::Error {
                    message: Some(message),
                });
            }
            return Ok(());
        }

        let state = match params.state {
            Some(s) => s,
            None => {
                self.bus.publish_callback(CallbackMessage::Error {
                    message: Some("missing state in callback".into()),
                });
                return Err(anyhow!("no state in redirect URL"));
            }
        };
        let code = match params.code {
            Some(c) => c,
            None => {
                self.bus.publish_callback(CallbackMessage::Error {
                    message: Some("missing code in callback".into()),
                });
                return Err(anyhow!("no code in redirect URL"));
            }
        };

        let pending = match self.store.consume(&state) {
            Some(p) => p,
            None => {
                warn!("callback state does not match any pending handshake");
                self.bus.publish_callback(CallbackMessage::Error {
                    message: Some("state mismatch".into()),
                });
                return Err(anyhow!("state mismatch: no pending handshake for callback"));
            }
        };

        match self.sessions.exchange_code(&code, &pending.verifier).await {
            Ok(_) => {
                self.bus.publish_callback(CallbackMessage::Success);
                Ok(())
            }
            Err(e) => {
                warn!("token exchange failed: {:#}", e);
                self.bus.publish_callback(CallbackMessage::Error {
                    message: Some("token exchange failed".into()),
                });
                Err(e)
            }
        }
    }
}
