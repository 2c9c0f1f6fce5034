use super::{BrowserLauncher, PopupHandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use url::Url;

/// Opens the authorization page in the operating system's default browser.
/// A system tab cannot be observed or closed again once opened, so the
/// handle it returns never reports closure; cancellation of a sign-in that
/// uses this launcher comes from the caller instead.
pub struct SystemBrowser;

impl SystemBrowser {
    pub fn new() -> Self {
        Self
    }
}

struct SystemPopup;

impl PopupHandle for SystemPopup {
    fn is_closed(&self) -> bool {
        false
    }
    fn close(&self) {}
}

#[async_trait]
impl BrowserLauncher for SystemBrowser {
    fn name(&self) -> &str {
        "system"
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn PopupHandle>> {
        info!("opening wallet authorization page in the system browser");
        let target = url.to_string();
        tokio::task::spawn_blocking(move || open::that(target))
            .await?
            .with_context(|| "opening system browser")?;
        Ok(Box::new(SystemPopup))
    }
}
