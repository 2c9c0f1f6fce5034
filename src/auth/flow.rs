use crate::auth::handshake::HandshakeStore;
use crate::auth::pkce::{self, ChallengeMethod, CodeChallenge};
use crate::auth::session::SessionManager;
use crate::auth::system::SystemBrowser;
use crate::auth::{BrowserLauncher, PopupHandle};
use crate::bus::AuthBus;
use crate::config::Config;
use crate::models::CallbackMessage;
use anyhow::{anyhow, Context};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// How often the wait loop checks whether the authorization window was
/// dismissed without completing.
const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Terminal failures of a sign-in attempt. kind() gives the stable string
/// UIs key their error states on.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("the sign-in window could not be opened")]
    PopupBlocked,
    #[error("sign-in was denied")]
    Denied,
    #[error("sign-in failed: {0}")]
    Callback(String),
    #[error("timed out waiting for the wallet callback")]
    Timeout,
    #[error("the sign-in window was closed before completing")]
    Cancelled,
    #[error("another sign-in attempt is already in progress")]
    AlreadyPending,
    #[error("wallet URL is not a secure transport; refusing the plain PKCE fallback")]
    InsecureTransport,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoginError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoginError::PopupBlocked => "popup_blocked",
            LoginError::Denied => "oauth_denied",
            LoginError::Callback(_) => "oauth_error",
            LoginError::Timeout => "timeout",
            LoginError::Cancelled => "cancelled",
            LoginError::AlreadyPending => "already_pending",
            LoginError::InsecureTransport => "insecure_transport",
            LoginError::Other(_) => "error",
        }
    }
}

/// Where a login attempt currently stands. Terminal outcomes are the
/// return value of the wait, not phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    Idle,
    GeneratingVerifier,
    PopupOpened,
    AwaitingCallback,
}

impl fmt::Display for LoginPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginPhase::Idle => "idle",
            LoginPhase::GeneratingVerifier => "generating_verifier",
            LoginPhase::PopupOpened => "popup_opened",
            LoginPhase::AwaitingCallback => "awaiting_callback",
        };
        f.write_str(s)
    }
}

/// A login attempt that has been started: the handshake is registered and
/// the authorization page is (possibly) open. Feed it to
/// wait_for_callback to drive it to a terminal outcome.
pub struct StartedLogin {
    pub authorize_url: Url,
    pub state: String,
    popup: Option<Box<dyn PopupHandle>>,
    rx: broadcast::Receiver<CallbackMessage>,
    deadline: Instant,
}

/// Orchestrates wallet sign-in: PKCE material, the pending handshake, the
/// browser window, and the bounded wait for the callback message.
pub struct LoginBroker {
    pub(crate) cfg: Config,
    pub(crate) store: HandshakeStore,
    pub(crate) bus: AuthBus,
    pub(crate) sessions: SessionManager,
    launcher: Arc<dyn BrowserLauncher>,
    phase: Mutex<LoginPhase>,
}

/// Build the wallet authorization URL for one handshake.
pub fn build_authorize_url(
    cfg: &Config,
    state: &str,
    challenge: &CodeChallenge,
) -> anyhow::Result<Url> {
    let base = cfg.base_url();
    let mut url = Url::parse(&format!(
        "{}/{}/oauth/authorize",
        base.trim_end_matches('/'),
        cfg.locale
    ))
    .with_context(|| format!("building authorize URL from base {}", base))?;
    url.query_pairs_mut()
        .append_pair("client_id", &cfg.client_id())
        .append_pair("redirect_uri", &cfg.redirect_uri())
        .append_pair("scope", &cfg.oauth_scope)
        .append_pair("state", state)
        .append_pair("code_challenge", &challenge.value)
        .append_pair("code_challenge_method", challenge.method.as_str())
        .append_pair("response_type", "code");
    Ok(url)
}

impl LoginBroker {
    pub fn new(cfg: Config) -> Self {
        Self::with_launcher(cfg, Arc::new(SystemBrowser::new()))
    }

    pub fn with_launcher(cfg: Config, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let store = HandshakeStore::new(Duration::from_secs(cfg.handshake_ttl_secs));
        let sessions = SessionManager::new(cfg.clone());
        Self {
            store,
            bus: AuthBus::new(),
            sessions,
            launcher,
            phase: Mutex::new(LoginPhase::Idle),
            cfg,
        }
    }

    pub fn bus(&self) -> &AuthBus {
        &self.bus
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn phase(&self) -> LoginPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, next: LoginPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != next {
            debug!("login phase {} -> {}", *phase, next);
            *phase = next;
        }
    }

    pub fn has_pending_login(&self) -> bool {
        self.store.has_pending()
    }

    /// Run a complete sign-in: open the browser and wait for the outcome.
    pub async fn login(&self) -> Result<(), LoginError> {
        let started = self.start_login(true).await?;
        self.wait_for_callback(started).await
    }

    /// Begin a sign-in attempt. Generates the PKCE material, registers the
    /// handshake, subscribes to callback messages, and opens the browser
    /// unless `open_browser` is false (callers then show authorize_url
    /// themselves).
    pub async fn start_login(&self, open_browser: bool) -> Result<StartedLogin, LoginError> {
        let client_id = self.cfg.client_id();
        if client_id.is_empty() {
            return Err(anyhow!("no wallet client_id configured").into());
        }

        self.set_phase(LoginPhase::GeneratingVerifier);
        let base = Url::parse(&self.cfg.base_url())
            .with_context(|| format!("invalid wallet base URL {}", self.cfg.base_url()))
            .map_err(|e| {
                self.set_phase(LoginPhase::Idle);
                LoginError::Other(e)
            })?;

        let secure = pkce::is_secure_transport(&base);
        if !secure && !self.cfg.allow_plain_challenge {
            self.set_phase(LoginPhase::Idle);
            return Err(LoginError::InsecureTransport);
        }

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier, secure);
        if challenge.method == ChallengeMethod::Plain {
            warn!(
                "wallet base URL {} is not a secure transport; sending the PKCE challenge with method 'plain'",
                base
            );
        }
        let state = pkce::generate_correlation_token();

        let authorize_url = match build_authorize_url(&self.cfg, &state, &challenge) {
            Ok(u) => u,
            Err(e) => {
                self.set_phase(LoginPhase::Idle);
                return Err(LoginError::Other(e));
            }
        };

        if !self.store.try_begin(&state, verifier, challenge.method) {
            self.set_phase(LoginPhase::Idle);
            return Err(LoginError::AlreadyPending);
        }

        // Subscribe before the window opens so no callback can slip past.
        let rx = self.bus.subscribe_callbacks();

        let popup = if open_browser {
            match self.launcher.open(&authorize_url).await {
                Ok(handle) => {
                    debug!("authorization page opened via {} launcher", self.launcher.name());
                    self.set_phase(LoginPhase::PopupOpened);
                    Some(handle)
                }
                Err(e) => {
                    warn!("could not open the authorization window: {:#}", e);
                    self.store.discard(&state);
                    self.set_phase(LoginPhase::Idle);
                    return Err(LoginError::PopupBlocked);
                }
            }
        } else {
            None
        };

        self.set_phase(LoginPhase::AwaitingCallback);
        Ok(StartedLogin {
            authorize_url,
            state,
            popup,
            rx,
            deadline: Instant::now() + Duration::from_secs(self.cfg.login_timeout_secs),
        })
    }

    /// Wait for the attempt to reach a terminal outcome: a callback
    /// message, the deadline, or the window being dismissed. Exactly one
    /// outcome is returned; whichever way it ends, the window is closed
    /// and the handshake entry and callback subscription are gone.
    pub async fn wait_for_callback(&self, mut started: StartedLogin) -> Result<(), LoginError> {
        let result = self.wait_inner(&mut started).await;
        if let Some(popup) = started.popup.take() {
            popup.close();
        }
        self.store.discard(&started.state);
        self.set_phase(LoginPhase::Idle);
        result
    }

    async fn wait_inner(&self, started: &mut StartedLogin) -> Result<(), LoginError> {
        loop {
            tokio::select! {
                msg = started.rx.recv() => match msg {
                    Ok(CallbackMessage::Success) => {
                        info!("wallet sign-in succeeded");
                        self.bus.publish_auth_changed();
                        return Ok(());
                    }
                    Ok(CallbackMessage::Denied) => {
                        info!("wallet sign-in was denied");
                        return Err(LoginError::Denied);
                    }
                    Ok(CallbackMessage::Error { message }) => {
                        let message =
                            message.unwrap_or_else(|| "wallet sign-in failed".to_string());
                        warn!("wallet callback reported an error: {}", message);
                        return Err(LoginError::Callback(message));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("callback bus lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(anyhow!("callback bus closed").into());
                    }
                },
                _ = sleep_until(started.deadline) => {
                    warn!(
                        "no wallet callback within {}s, giving up",
                        self.cfg.login_timeout_secs
                    );
                    return Err(LoginError::Timeout);
                }
                _ = sleep(POPUP_POLL_INTERVAL), if started.popup.is_some() => {
                    if started.popup.as_ref().map_or(false, |p| p.is_closed()) {
                        info!("authorization window was closed before completing");
                        return Err(LoginError::Cancelled);
                    }
                }
            }
        }
    }

    /// Abort whatever sign-in is pending. Safe to call when none is.
    pub fn cancel_pending(&self) {
        self.store.clear();
        self.set_phase(LoginPhase::Idle);
    }

    /// Drop the stored wallet session and tell listeners.
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.sessions.clear().await?;
        self.bus.publish_auth_changed();
        info!("wallet session cleared");
        Ok(())
    }
}
