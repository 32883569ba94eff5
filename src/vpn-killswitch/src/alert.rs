//! Operator alerts
//!
//! Desktop notifications plus log lines. Notifications are fire-and-forget:
//! the notifier process is spawned and never awaited, and a missing
//! notifier only produces a debug log line.

use std::process::{Command, Stdio};
use tracing::{debug, error, info, warn};

/// Title used for every notification.
pub const ALERT_TITLE: &str = "kill_switch";

/// Severity of a logged alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for operator-facing alerts.
pub trait AlertSink: Send + Sync {
    /// Best-effort desktop notification. Must not block on delivery.
    fn notify(&self, title: &str, subtitle: &str, message: &str, play_sound: bool);

    /// Append a line to the configured log sinks.
    fn log(&self, level: AlertLevel, message: &str);

    /// Log and notify in one go.
    fn alert(&self, level: AlertLevel, subtitle: &str, message: &str) {
        self.log(level, message);
        self.notify(ALERT_TITLE, subtitle, message, true);
    }
}

/// Alerts delivered through tracing and the platform notifier.
#[derive(Debug, Clone, Copy)]
pub struct SystemAlerts {
    notifications: bool,
}

impl SystemAlerts {
    /// `notifications = false` keeps logging but never spawns a notifier.
    pub fn new(notifications: bool) -> Self {
        Self { notifications }
    }
}

impl Default for SystemAlerts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AlertSink for SystemAlerts {
    fn notify(&self, title: &str, subtitle: &str, message: &str, play_sound: bool) {
        if !self.notifications {
            return;
        }

        let (program, args) = notifier_argv(title, subtitle, message, play_sound);
        if let Err(e) = spawn_detached(program, &args) {
            debug!(notifier = %program, %e, "desktop notification unavailable");
        }
    }

    fn log(&self, level: AlertLevel, message: &str) {
        let message = message.trim_end();
        match level {
            AlertLevel::Debug => debug!("{}", message),
            AlertLevel::Info => info!("{}", message),
            AlertLevel::Warn => warn!("{}", message),
            AlertLevel::Error => error!("{}", message),
        }
    }
}

/// Start `program` without waiting for it. The child is reaped on a
/// detached thread so it never lingers as a zombie.
fn spawn_detached(program: &str, args: &[String]) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

/// Program and arguments of the platform notifier.
#[cfg(target_os = "macos")]
fn notifier_argv(
    title: &str,
    subtitle: &str,
    message: &str,
    play_sound: bool,
) -> (&'static str, Vec<String>) {
    let mut script = format!(
        "display notification {} with title {} subtitle {}",
        applescript_string(message),
        applescript_string(title),
        applescript_string(subtitle)
    );
    if play_sound {
        script.push_str(" sound name \"default\"");
    }
    ("osascript", vec!["-e".to_string(), script])
}

#[cfg(not(target_os = "macos"))]
fn notifier_argv(
    title: &str,
    subtitle: &str,
    message: &str,
    play_sound: bool,
) -> (&'static str, Vec<String>) {
    let urgency = if play_sound { "critical" } else { "normal" };
    (
        "notify-send",
        vec![
            "--urgency".to_string(),
            urgency.to_string(),
            format!("{}: {}", title, subtitle),
            message.trim_end().to_string(),
        ],
    )
}

/// Quote a value as an AppleScript string literal.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped.trim_end())
}
