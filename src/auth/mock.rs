use super::{BrowserLauncher, PopupHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// A scriptable launcher used in tests. It records every URL it is asked
/// to open, can simulate a blocked window, and lets the test close the
/// window from outside to drive the cancellation path.
pub struct MockBrowser {
    blocked: bool,
    opened: Mutex<Vec<String>>,
    closed: Arc<AtomicBool>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            blocked: false,
            opened: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A launcher whose open() always fails, like a blocked popup.
    pub fn blocked() -> Self {
        Self {
            blocked: true,
            ..Self::new()
        }
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mark the window closed, as if the user dismissed it.
    pub fn close_window(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn window_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockPopup {
    closed: Arc<AtomicBool>,
}

impl PopupHandle for MockPopup {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserLauncher for MockBrowser {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, url: &url::Url) -> Result<Box<dyn PopupHandle>> {
        if self.blocked {
            info!("MockBrowser: refusing to open {}", url);
            return Err(anyhow!("window blocked"));
        }
        info!("MockBrowser: open {}", url);
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Ok(Box::new(MockPopup {
            closed: self.closed.clone(),
        }))
    }
}
