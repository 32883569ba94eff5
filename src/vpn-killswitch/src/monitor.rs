//! Kill switch state machine
//!
//! ```text
//!  Idle ──subscribe ok──▶ Watching ──first drop event──▶ Killing ──batch done──▶ Terminated
//!                            │  ▲                                                   ▲
//!                            └──┘ present value / other key                         │
//!                            └──────────────────── cancellation ───────────────────┘
//! ```
//!
//! The `Watching → Killing` edge is taken at most once per monitor. Every
//! event after it is ignored, so a burst of drop notifications yields a
//! single kill batch. Events arrive through one channel and are handled
//! with `&mut self`, which serialises OS callbacks from any thread.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertLevel, AlertSink};
use crate::error::{KillSwitchError, Result};
use crate::interface::{validate_interface_name, InterfaceController, KillReport};
use crate::routes::{dedup_in_order, DefaultRouteSource};
use crate::watcher::{notification_key, ChangeEvent, ChangeWatcher};

/// Interface watched when none is configured.
pub const DEFAULT_MONITORED_INTERFACE: &str = "utun0";

/// Which interfaces to disable when the VPN drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    /// Fixed list, in kill order
    Static(Vec<String>),
    /// Interfaces holding a default route at the moment of the kill
    Dynamic,
}

impl KillTarget {
    /// Build a static target from raw names.
    ///
    /// Names are trimmed, empty entries dropped and duplicates removed
    /// (first occurrence wins). An empty result is a configuration error.
    pub fn from_names<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        let mut names = Vec::new();
        for name in raw.iter().map(|s| s.as_ref().trim()) {
            if name.is_empty() {
                continue;
            }
            validate_interface_name(name)?;
            names.push(name.to_string());
        }
        let names = dedup_in_order(names);
        if names.is_empty() {
            return Err(KillSwitchError::Config(
                "--kill needs at least one interface name".into(),
            ));
        }
        Ok(KillTarget::Static(names))
    }
}

impl fmt::Display for KillTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillTarget::Static(names) => write!(f, "{}", names.join(",")),
            KillTarget::Dynamic => write!(f, "default-route interfaces"),
        }
    }
}

/// Lifecycle of a monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Watching,
    Killing,
    Terminated,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Cancelled from outside while still watching
    Cancelled,
    /// The kill batch ran; the report says which interfaces went down
    Killed(KillReport),
    /// The run ended on an error (subscription, target resolution)
    Aborted(KillSwitchError),
}

impl RunOutcome {
    /// Process exit code: zero for a clean shutdown or a fully successful kill.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Cancelled => 0,
            RunOutcome::Killed(report) => report.result().map_or_else(|e| e.exit_code(), |_| 0),
            RunOutcome::Aborted(e) => e.exit_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Watches one interface and disables the kill target when it loses its address.
pub struct KillSwitchMonitor {
    interface: String,
    key: String,
    target: KillTarget,
    routes: Arc<dyn DefaultRouteSource>,
    controller: InterfaceController,
    alerts: Arc<dyn AlertSink>,
    state: MonitorState,
}

impl KillSwitchMonitor {
    pub fn new(
        interface: impl Into<String>,
        target: KillTarget,
        routes: Arc<dyn DefaultRouteSource>,
        controller: InterfaceController,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let interface = interface.into();
        Self {
            key: notification_key(&interface),
            interface,
            target,
            routes,
            controller,
            alerts,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Notification key this monitor reacts to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> &KillTarget {
        &self.target
    }

    /// Subscribe through `watcher` and move to `Watching`.
    ///
    /// On failure the monitor is terminated without ever watching, and the
    /// error is logged and notified.
    pub async fn start<W: ChangeWatcher>(
        &mut self,
        watcher: &mut W,
    ) -> Result<mpsc::Receiver<ChangeEvent>> {
        if self.state != MonitorState::Idle {
            return Err(KillSwitchError::Subscription(format!(
                "monitor cannot start from state {:?}",
                self.state
            )));
        }

        match watcher.subscribe(&self.interface).await {
            Ok(rx) => {
                self.state = MonitorState::Watching;
                info!(
                    interface = %self.interface,
                    target = %self.target,
                    "watching VPN interface"
                );
                Ok(rx)
            }
            Err(e) => {
                self.state = MonitorState::Terminated;
                self.alerts.alert(
                    AlertLevel::Error,
                    "Error!",
                    &format!("kill switch could not start monitoring {}: {}", self.interface, e),
                );
                Err(e)
            }
        }
    }

    /// Feed one change event.
    ///
    /// Returns `Some` when the event triggered the kill sequence; the run is
    /// over at that point. Every other event returns `None`.
    pub fn handle_event(&mut self, event: &ChangeEvent) -> Option<RunOutcome> {
        if self.state != MonitorState::Watching {
            debug!(key = %event.key, state = ?self.state, "event ignored");
            return None;
        }
        if !event.is_drop_of(&self.key) {
            match &event.value {
                Some(addrs) if event.key == self.key => {
                    debug!(key = %event.key, addrs = ?addrs, "VPN interface still has an address")
                }
                _ => debug!(key = %event.key, "event for unrelated key ignored"),
            }
            return None;
        }

        self.state = MonitorState::Killing;
        warn!(interface = %self.interface, "VPN interface lost its address, killing network");
        let outcome = self.kill();
        self.state = MonitorState::Terminated;
        Some(outcome)
    }

    /// Stop watching after an external cancellation.
    pub fn cancel(&mut self) {
        if matches!(self.state, MonitorState::Idle | MonitorState::Watching) {
            self.state = MonitorState::Terminated;
        }
    }

    /// The change stream ended while watching.
    pub(crate) fn subscription_lost(&mut self) -> RunOutcome {
        self.state = MonitorState::Terminated;
        let err = KillSwitchError::Subscription(format!(
            "change notifications for {} stopped; the kill switch is no longer armed",
            self.interface
        ));
        self.alerts.alert(AlertLevel::Error, "Error!", &err.to_string());
        RunOutcome::Aborted(err)
    }

    fn kill(&mut self) -> RunOutcome {
        let targets = match self.resolve_target() {
            Ok(t) => t,
            Err(e) => {
                self.alerts.alert(
                    AlertLevel::Error,
                    "VPN ALERT",
                    &format!(
                        "VPN connection on {} died but no interface could be disabled: {}",
                        self.interface, e
                    ),
                );
                return RunOutcome::Aborted(e);
            }
        };

        let report = self.controller.kill_all(&targets);
        if report.is_success() {
            info!(%report, "kill switch engaged");
        } else {
            error!(%report, "kill switch engaged with failures");
        }
        RunOutcome::Killed(report)
    }

    /// Resolve the kill target. Dynamic targets are queried fresh every call.
    fn resolve_target(&self) -> Result<Vec<String>> {
        let names = match &self.target {
            KillTarget::Static(names) => names.clone(),
            KillTarget::Dynamic => {
                let found = self.routes.default_route_interfaces().map_err(|e| {
                    error!(%e, "cannot read the routing table");
                    KillSwitchError::NoTarget
                })?;
                found
                    .into_iter()
                    .filter(|name| *name != self.interface)
                    .collect()
            }
        };

        if names.is_empty() {
            return Err(KillSwitchError::NoTarget);
        }
        debug!(targets = ?names, "kill target resolved");
        Ok(names)
    }
}
