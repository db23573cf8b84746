use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::scan_loop;
use super::orchestrator::Orchestrator;

/// Starts and stops the periodic scan loop for one orchestrator.
#[derive(Default)]
pub struct ScanController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    drain_tx: Option<watch::Sender<bool>>,
}

impl ScanController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Ticks every `scanIntervalMs` of the orchestrator's settings.
    pub async fn start(&mut self, orchestrator: Arc<Orchestrator>) -> Result<()> {
        if self.handle.is_some() {
            bail!("scanning already active");
        }
        let interval = orchestrator.settings().scan_interval();
        if interval.is_zero() {
            bail!("scan interval must be positive");
        }

        let cancel_token = CancellationToken::new();
        // false = normal operation, true = finish the current cycle then exit
        let (drain_tx, drain_rx) = watch::channel(false);

        let handle = tokio::spawn(scan_loop(orchestrator, interval, cancel_token.clone(), drain_rx));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.drain_tx = Some(drain_tx);
        info!("scan controller started ({}ms interval)", interval.as_millis());
        Ok(())
    }

    /// Lets the in-flight cycle finish, then stops the loop.
    pub async fn drain(&mut self) -> Result<()> {
        if let Some(tx) = self.drain_tx.take() {
            let _ = tx.send(true);
            info!("drain signal sent to scan loop");
        }
        self.cancel_token.take();
        self.join().await
    }

    /// Stops immediately, abandoning any in-flight cycle.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        let joined = self.join().await;
        self.drain_tx.take();
        joined
    }

    async fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.context("scan loop task failed to join"),
            None => Ok(()),
        }
    }
}
