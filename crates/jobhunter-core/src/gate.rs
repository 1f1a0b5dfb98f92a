use std::sync::Arc;

use tokio::sync::watch;

use crate::error::AppError;
use crate::traits::DispatchController;

/// Open/closed gate a dispatch loop waits on before sending each request.
///
/// Implements [`DispatchController`] so the ban detector can close it for
/// the whole crawl and reopen it after the cooldown.
#[derive(Clone)]
pub struct DispatchGate {
    open: Arc<watch::Sender<bool>>,
}

impl DispatchGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { open: Arc::new(tx) }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Resolve immediately when open, otherwise wait until resumed.
    pub async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchController for DispatchGate {
    fn suspend(&self) -> Result<(), AppError> {
        self.open.send_replace(false);
        tracing::debug!("Dispatch gate closed");
        Ok(())
    }

    fn resume(&self) {
        self.open.send_replace(true);
        tracing::debug!("Dispatch gate opened");
    }
}
