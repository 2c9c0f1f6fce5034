use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub wallet_client_id: String,
    #[serde(default = "default_wallet_base_url")]
    pub wallet_base_url: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_oauth_scope")]
    pub oauth_scope: String,
    #[serde(default = "default_redirect_origin")]
    pub redirect_origin: String,

    // Login flow timing
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_handshake_ttl")]
    pub handshake_ttl_secs: u64,

    /// Allow the PKCE "plain" challenge method when the wallet base URL is
    /// not a secure transport. Off by default; sign-in refuses to run
    /// instead of weakening the handshake.
    #[serde(default)]
    pub allow_plain_challenge: bool,

    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_wallet_base_url() -> String { "https://wallet.example.az".into() }
fn default_locale() -> String { "az".into() }
fn default_oauth_scope() -> String { "openid profile".into() }
fn default_redirect_origin() -> String { "http://localhost:3000".into() }
fn default_login_timeout() -> u64 { 300 }
fn default_handshake_ttl() -> u64 { 600 }
fn default_db_path() -> PathBuf { "/var/lib/wallet-login/broker.db".into() }
fn default_log_dir() -> PathBuf { "/var/log/wallet-login".into() }

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Wallet base URL, overridable by WALLET_BASE_URL (useful for tests).
    pub fn base_url(&self) -> String {
        env::var("WALLET_BASE_URL").unwrap_or_else(|_| self.wallet_base_url.clone())
    }

    /// OAuth client id, overridable by WALLET_CLIENT_ID.
    pub fn client_id(&self) -> String {
        env::var("WALLET_CLIENT_ID").unwrap_or_else(|_| self.wallet_client_id.clone())
    }

    /// Redirect URI registered with the wallet for this client.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/auth/wallet/callback",
            self.redirect_origin.trim_end_matches('/')
        )
    }
}
