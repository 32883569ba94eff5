//! vpn-killswitch: disables network interfaces when the VPN drops.
//!
//! Must run as root. Monitors `utun0` by default and disables the
//! interfaces holding the default route when it loses its IPv4 address.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use vpn_killswitch::error::EXIT_SETUP;
use vpn_killswitch::lifecycle::{self, setup_shutdown_signal};
use vpn_killswitch::{
    logging, privilege, AlertLevel, AlertSink, Args, InterfaceController, KillSwitchError,
    KillSwitchMonitor, NetmonWatcher, RouteTableInspector, RunOutcome, Settings, SystemAlerts,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match prepare(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            return ExitCode::from(exit_code_for(&e));
        }
    };

    let alerts: Arc<dyn AlertSink> = Arc::new(SystemAlerts::new(settings.notifications));

    if let Err(e) = privilege::check_privileges() {
        alerts.alert(
            AlertLevel::Error,
            "Error!",
            &format!(
                "kill switch started with insufficient permissions ({}).\nRun it again with sudo. Exiting now...",
                e
            ),
        );
        return ExitCode::from(e.exit_code());
    }

    let outcome = run(settings, alerts).await;
    match &outcome {
        RunOutcome::Cancelled => info!("kill switch stopped"),
        RunOutcome::Killed(report) if report.is_success() => info!("kill switch finished"),
        RunOutcome::Killed(report) => error!(%report, "kill switch finished with failures"),
        RunOutcome::Aborted(e) => error!(%e, "kill switch aborted"),
    }
    ExitCode::from(outcome.exit_code())
}

/// Resolve settings and install logging.
fn prepare(args: &Args) -> Result<Settings> {
    let settings = Settings::resolve(args).context("loading configuration")?;
    logging::init_tracing(settings.log_file.as_deref()).context("initialising logging")?;
    Ok(settings)
}

async fn run(settings: Settings, alerts: Arc<dyn AlertSink>) -> RunOutcome {
    info!("{}", lifecycle::startup_line());
    info!(
        monitor = %settings.monitor,
        target = %settings.target,
        heartbeat_secs = settings.heartbeat.as_secs(),
        "configuration loaded"
    );

    let controller =
        InterfaceController::system(alerts.clone()).with_attempts(settings.down_attempts);
    let mut monitor = KillSwitchMonitor::new(
        settings.monitor.clone(),
        settings.target.clone(),
        Arc::new(RouteTableInspector::system()),
        controller,
        alerts,
    );
    let mut watcher = NetmonWatcher::new(settings.heartbeat);

    let shutdown = setup_shutdown_signal();
    lifecycle::run(&mut monitor, &mut watcher, settings.heartbeat, async {
        let _ = shutdown.await;
    })
    .await
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<KillSwitchError>()
        .map_or(EXIT_SETUP, KillSwitchError::exit_code)
}
