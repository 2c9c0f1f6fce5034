pub mod pkce;
pub mod handshake;
pub mod system;
pub mod mock;
pub mod flow;
pub mod callback;
pub mod session;

use anyhow::Result;
use url::Url;

/// BrowserLauncher trait: how a login attempt opens the wallet's
/// authorization page.
/// Implementations: system::SystemBrowser, mock::MockBrowser.
#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Open the authorization URL and return a handle standing in for the
    /// opened window. An error here means the window could not be opened
    /// (the popup-blocked case).
    async fn open(&self, url: &Url) -> Result<Box<dyn PopupHandle>>;

    /// Return the launcher's name (for logging)
    fn name(&self) -> &str;
}

/// Handle for an opened authorization window.
pub trait PopupHandle: Send + Sync {
    /// True once the window is known to be closed.
    fn is_closed(&self) -> bool;

    /// Ask the window to close. Best effort; ignored when unsupported.
    fn close(&self);
}
