use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::orchestrator::Orchestrator;
use super::state::TickOutcome;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "ScanLoop";

use crate::{log_debug, log_info};

/// Fires `on_tick` every `interval` until cancelled or drained.
///
/// Each tick runs on its own task so a slow pipeline never delays the ticker;
/// ticks that land on a running cycle are skipped by the orchestrator.
pub async fn scan_loop(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    cancel_token: CancellationToken,
    mut drain_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    log_info!("scan loop started ({}ms interval)", interval.as_millis());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("scan loop shutting down");
                in_flight.abort_all();
                break;
            }
            changed = drain_rx.changed() => {
                if changed.is_err() || *drain_rx.borrow() {
                    log_info!("draining: waiting for {} in-flight cycle(s)", in_flight.len());
                    while in_flight.join_next().await.is_some() {}
                    break;
                }
            }
            _ = ticker.tick() => {
                while in_flight.try_join_next().is_some() {}
                let orchestrator = Arc::clone(&orchestrator);
                in_flight.spawn(async move { run_tick(&orchestrator).await });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    log_info!("scan loop stopped");
}

async fn run_tick(orchestrator: &Orchestrator) {
    match orchestrator.on_tick().await {
        Ok(TickOutcome::Skipped(reason)) => log_debug!("tick skipped ({:?})", reason),
        Ok(TickOutcome::Classified { .. }) => {}
        // already logged with timings by the orchestrator
        Err(err) => log_debug!("tick ended early: {err}"),
    }
}
