use crate::config::Config;
use crate::db;
use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// How close to expiry a session may get before it is refreshed.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64, // epoch seconds
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl StoredSession {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }
}

#[derive(Serialize, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Wallet session manager for a public PKCE client: exchanges codes at
/// the wallet token endpoint, keeps the current session cached behind a
/// mutex, persists it as JSON in the DB, and refreshes it near expiry.
/// No client secret is involved anywhere; the code exchange is
/// authenticated by the code_verifier alone.
pub struct SessionManager {
    client: Client,
    cfg: Config,
    session: tokio::sync::Mutex<Option<StoredSession>>,
}

impl SessionManager {
    pub fn new(cfg: Config) -> Self {
        Self {
            client: Client::new(),
            cfg,
            session: tokio::sync::Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.cfg.base_url().trim_end_matches('/'))
    }

    /// Exchange an authorization code for a session and persist it.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<StoredSession> {
        let client_id = self.cfg.client_id();
        let redirect_uri = self.cfg.redirect_uri();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &redirect_uri),
            ("client_id", &client_id),
            ("code_verifier", verifier),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange failed: {} => {}", status, txt));
        }

        let tr: TokenResponse = resp.json().await?;
        let expires_at = Utc::now().timestamp() + tr.expires_in;
        let session = StoredSession {
            access_token: tr.access_token,
            token_type: tr.token_type,
            expires_at,
            refresh_token: tr.refresh_token,
            scope: tr.scope,
        };
        self.persist_to_db(&session).await?;
        *self.session.lock().await = Some(session.clone());
        debug!("wallet session stored, expires_at {}", session.expires_at);
        Ok(session)
    }

    /// Make sure a usable session is loaded, refreshing it when it is
    /// within the expiry skew.
    pub async fn ensure_session(&self) -> Result<()> {
        let mut lock = self.session.lock().await;
        if lock.is_none() {
            if let Some(stored) = self.load_from_db().await? {
                *lock = Some(stored);
            }
        }
        if let Some(current) = &*lock {
            let now = Utc::now().timestamp();
            if now + EXPIRY_SKEW_SECS >= current.expires_at {
                debug!("wallet session is near expiry, refreshing");
                let mut cur = current.clone();
                self.refresh_internal(&mut cur).await?;
                *lock = Some(cur);
            }
        }
        Ok(())
    }

    /// Force a refresh of the stored session.
    pub async fn refresh(&self) -> Result<()> {
        let mut lock = self.session.lock().await;
        if lock.is_none() {
            if let Some(stored) = self.load_from_db().await? {
                *lock = Some(stored);
            }
        }
        let current = lock
            .as_mut()
            .ok_or_else(|| anyhow!("no stored wallet session"))?;
        self.refresh_internal(current).await
    }

    async fn refresh_internal(&self, cur: &mut StoredSession) -> Result<()> {
        let refresh_token = cur
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow!("no refresh token"))?;
        let client_id = self.cfg.client_id();
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", &client_id),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "failed to refresh wallet session: {} - {}",
                status,
                body
            ));
        }
        let j: serde_json::Value = resp.json().await?;
        let access_token = j["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("no access_token"))?
            .to_string();
        let expires_in = j["expires_in"].as_i64().unwrap_or(3600);
        cur.access_token = access_token;
        cur.token_type = "Bearer".into();
        cur.expires_at = Utc::now().timestamp() + expires_in;
        if let Some(s) = j["scope"].as_str() {
            cur.scope = Some(s.to_string());
        }
        // the wallet rotates refresh tokens
        if let Some(rt) = j["refresh_token"].as_str() {
            cur.refresh_token = Some(rt.to_string());
        }
        self.persist_to_db(cur).await?;
        Ok(())
    }

    /// The current access token, refreshing first when needed.
    pub async fn access_token(&self) -> Result<String> {
        self.ensure_session().await?;
        let lock = self.session.lock().await;
        let session = lock.as_ref().ok_or_else(|| anyhow!("not signed in"))?;
        Ok(session.access_token.clone())
    }

    /// The stored session, if any, loading it from the DB on first use.
    pub async fn current(&self) -> Result<Option<StoredSession>> {
        let mut lock = self.session.lock().await;
        if lock.is_none() {
            if let Some(stored) = self.load_from_db().await? {
                *lock = Some(stored);
            }
        }
        Ok(lock.clone())
    }

    /// Forget the session, in memory and on disk.
    pub async fn clear(&self) -> Result<()> {
        *self.session.lock().await = None;
        let db_path = self.cfg.db_path.clone();
        let client_id = self.cfg.client_id();
        let removed = tokio::task::spawn_blocking(move || -> Result<usize, anyhow::Error> {
            let conn = db::open_or_create(&db_path)?;
            db::delete_session(&conn, &client_id)
        })
        .await??;
        if removed == 0 {
            warn!("logout: no stored wallet session to remove");
        }
        Ok(())
    }

    async fn load_from_db(&self) -> Result<Option<StoredSession>> {
        let db_path = self.cfg.db_path.clone();
        let client_id = self.cfg.client_id();
        let json_opt =
            tokio::task::spawn_blocking(move || -> Result<Option<String>, anyhow::Error> {
                let conn = db::open_or_create(&db_path)?;
                db::load_session_raw(&conn, &client_id)
            })
            .await??;

        if let Some(s) = json_opt {
            let session: StoredSession =
                serde_json::from_str(&s).map_err(|e| anyhow!("parse session json: {}", e))?;
            Ok(Some(session))
        } else {
            Ok(None)
        }
    }

    async fn persist_to_db(&self, session: &StoredSession) -> Result<()> {
        let db_path = self.cfg.db_path.clone();
        let client_id = self.cfg.client_id();
        let json = serde_json::to_string(session)?;
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let conn = db::open_or_create(&db_path)?;
            db::save_session_raw(&conn, &client_id, &json)
        })
        .await??;
        Ok(())
    }
}
