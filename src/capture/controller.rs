use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::CaptureLoop;

/// Runs the capture loop on its own task and stops it on request.
pub struct CaptureController {
    handle: Option<JoinHandle<Result<()>>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, mut capture_loop: CaptureLoop, cancel_token: CancellationToken) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture loop already active");
        }

        let token_clone = cancel_token.clone();
        let handle = tokio::spawn(async move { capture_loop.run(token_clone).await });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Capture loop started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Waits for the loop to end on its own, which only happens on a fatal
    /// error or after cancellation.
    pub async fn finished(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => {
                let result = handle.await.context("capture loop task failed to join")?;
                self.handle = None;
                self.cancel_token = None;
                result
            }
            None => Ok(()),
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("capture loop task failed to join")?
        } else {
            Ok(())
        }
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}
