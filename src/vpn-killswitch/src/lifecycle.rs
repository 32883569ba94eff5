//! Process lifecycle: the event loop and shutdown signal handling.

use chrono::Local;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};

use crate::interface::TIMESTAMP_FORMAT;
use crate::monitor::{KillSwitchMonitor, RunOutcome};
use crate::watcher::ChangeWatcher;

/// Default heartbeat period of the event loop.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Log line written once the monitor is configured.
pub fn startup_line() -> String {
    format!(
        "kill switch VPN monitor initiated at {}",
        Local::now().format(TIMESTAMP_FORMAT)
    )
}

/// Log line written when an interrupt ends the run.
pub fn interrupt_line() -> String {
    format!(
        "interrupt received, exiting kill switch at {}",
        Local::now().format(TIMESTAMP_FORMAT)
    )
}

/// Drive `monitor` until it kills, its subscription ends, or `shutdown` resolves.
///
/// Change events take priority over the shutdown future so a drop that
/// races with Ctrl+C still disables the network. The watcher is always
/// unsubscribed before returning.
pub async fn run<W, S>(
    monitor: &mut KillSwitchMonitor,
    watcher: &mut W,
    heartbeat: Duration,
    shutdown: S,
) -> RunOutcome
where
    W: ChangeWatcher,
    S: Future<Output = ()>,
{
    let mut events = match monitor.start(watcher).await {
        Ok(rx) => rx,
        Err(e) => {
            watcher.unsubscribe().await;
            return RunOutcome::Aborted(e);
        }
    };

    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(heartbeat.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Some(event) => {
                    if let Some(outcome) = monitor.handle_event(&event) {
                        break outcome;
                    }
                }
                None => break monitor.subscription_lost(),
            },
            _ = &mut shutdown => {
                monitor.cancel();
                info!("{}", interrupt_line());
                break RunOutcome::Cancelled;
            }
            _ = ticker.tick() => trace!(state = ?monitor.state(), "heartbeat"),
        }
    };

    watcher.unsubscribe().await;
    outcome
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
///
/// If no handler can be installed the receiver never resolves; the process
/// then stops only through a kill or an external signal.
pub fn setup_shutdown_signal() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        if wait_for_signal().await {
            let _ = tx.send(());
        } else {
            // keep the sender alive so the receiver stays pending
            let _keep = tx;
            std::future::pending::<()>().await;
        }
    });

    rx
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
            }
            true
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(%e, "cannot install signal handlers, falling back to Ctrl+C");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}

async fn ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C");
            true
        }
        Err(e) => {
            warn!(%e, "cannot listen for Ctrl+C");
            false
        }
    }
}
