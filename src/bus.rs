use crate::models::{AuthEvent, CallbackMessage};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 16;

/// In-process fan-out for the two login signals: callback messages posted
/// by the authorization redirect, and auth-state-changed notifications.
/// Subscribers that drop their receiver stop being counted; publishing to
/// zero subscribers is a no-op.
pub struct AuthBus {
    callbacks: broadcast::Sender<CallbackMessage>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl AuthBus {
    pub fn new() -> Self {
        let (callbacks, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (auth_events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            callbacks,
            auth_events,
        }
    }

    pub fn subscribe_callbacks(&self) -> broadcast::Receiver<CallbackMessage> {
        self.callbacks.subscribe()
    }

    /// Publish a callback message. Returns how many subscribers received it.
    pub fn publish_callback(&self, msg: CallbackMessage) -> usize {
        match self.callbacks.send(msg) {
            Ok(n) => n,
            Err(_) => {
                debug!("callback message had no subscribers");
                0
            }
        }
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    /// Announce that the stored session changed. Returns the subscriber count.
    pub fn publish_auth_changed(&self) -> usize {
        self.auth_events.send(AuthEvent::StateChanged).unwrap_or(0)
    }
}

impl Default for AuthBus {
    fn default() -> Self {
        Self::new()
    }
}
