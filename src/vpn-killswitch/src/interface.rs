//! Interface shutdown
//!
//! Brings interfaces administratively down and reports what happened.
//!
//! # Behaviour
//! - Every interface in the batch is attempted, even after a failure
//! - Each interface gets up to `attempts` tries before it is marked failed
//! - Names are validated before any command is spawned
//! - The batch summary is always logged and sent as a notification

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alert::{AlertLevel, AlertSink, ALERT_TITLE};
use crate::error::{KillSwitchError, Result};
use crate::exec::{CommandRunner, SystemRunner};

/// Longest interface name accepted (IFNAMSIZ minus the terminating NUL).
pub const MAX_INTERFACE_NAME: usize = 15;

/// Default number of tries per interface.
pub const DEFAULT_DOWN_ATTEMPTS: u32 = 3;

/// Pause between tries for the same interface.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Timestamp format used in log and notification text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Check an interface name against the OS naming rules.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
}

/// Validate an interface name, returning a configuration error when invalid.
pub fn validate_interface_name(name: &str) -> Result<()> {
    if is_valid_interface_name(name) {
        Ok(())
    } else {
        Err(KillSwitchError::Config(format!(
            "invalid interface name {:?}: expected 1-{} characters of [A-Za-z0-9._:-]",
            name, MAX_INTERFACE_NAME
        )))
    }
}

/// Command used to bring an interface administratively down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownCommand {
    /// `ifconfig <name> down` (macOS, BSD)
    Ifconfig,
    /// `ip link set dev <name> down` (Linux)
    IpLink,
}

impl DownCommand {
    /// Command used on the current platform.
    pub fn native() -> Self {
        if cfg!(target_os = "linux") {
            DownCommand::IpLink
        } else {
            DownCommand::Ifconfig
        }
    }

    /// Program and arguments for `name`.
    pub fn argv<'a>(&self, name: &'a str) -> (&'static str, Vec<&'a str>) {
        match self {
            DownCommand::Ifconfig => ("ifconfig", vec![name, "down"]),
            DownCommand::IpLink => ("ip", vec!["link", "set", "dev", name, "down"]),
        }
    }
}

/// Result of trying to disable a single interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    Disabled,
    Failed(String),
}

/// Per-interface entry in a [`KillReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceOutcome {
    pub name: String,
    pub outcome: KillOutcome,
}

/// Aggregated result of a kill batch.
#[derive(Debug, Clone)]
pub struct KillReport {
    /// When the batch finished
    pub finished_at: DateTime<Local>,
    /// Outcomes in the order the interfaces were processed
    pub outcomes: Vec<InterfaceOutcome>,
}

impl KillReport {
    /// Names that were brought down.
    pub fn disabled(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == KillOutcome::Disabled)
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Names that stayed up.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, KillOutcome::Failed(_)))
            .map(|o| o.name.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// `Ok` when every interface went down, otherwise [`KillSwitchError::InterfaceDown`].
    pub fn result(&self) -> Result<()> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(KillSwitchError::InterfaceDown {
                failed: failed.into_iter().map(str::to_string).collect(),
            })
        }
    }

    /// Human-readable summary: timestamp followed by one line per interface.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "VPN connection died at: {}\n",
            self.finished_at.format(TIMESTAMP_FORMAT)
        );
        for o in &self.outcomes {
            match &o.outcome {
                KillOutcome::Disabled => text.push_str(&format!("{}: disabled\n", o.name)),
                KillOutcome::Failed(reason) => {
                    text.push_str(&format!("{}: FAILED ({})\n", o.name, reason))
                }
            }
        }
        text
    }
}

impl fmt::Display for KillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disabled [{}], failed [{}]",
            self.disabled().join(", "),
            self.failed().join(", ")
        )
    }
}

/// Issues the privileged interface-down commands.
pub struct InterfaceController {
    runner: Arc<dyn CommandRunner>,
    alerts: Arc<dyn AlertSink>,
    command: DownCommand,
    attempts: u32,
    retry_delay: Duration,
}

impl InterfaceController {
    /// Controller for the current platform using real subprocesses.
    pub fn system(alerts: Arc<dyn AlertSink>) -> Self {
        Self::new(Arc::new(SystemRunner), alerts, DownCommand::native())
    }

    pub fn new(
        runner: Arc<dyn CommandRunner>,
        alerts: Arc<dyn AlertSink>,
        command: DownCommand,
    ) -> Self {
        Self {
            runner,
            alerts,
            command,
            attempts: DEFAULT_DOWN_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the number of tries per interface (at least one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Bring every interface in `names` down, in order.
    ///
    /// Never short-circuits: a failure on one interface does not prevent the
    /// rest from being attempted. The summary is logged and notified before
    /// returning; use [`KillReport::result`] for the aggregate verdict.
    pub fn kill_all(&self, names: &[String]) -> KillReport {
        info!(interfaces = ?names, "disabling interfaces");

        let outcomes = names
            .iter()
            .map(|name| InterfaceOutcome {
                name: name.clone(),
                outcome: self.disable(name),
            })
            .collect();

        let report = KillReport {
            finished_at: Local::now(),
            outcomes,
        };

        let summary = report.summary();
        if report.is_success() {
            self.alerts.log(AlertLevel::Info, &summary);
        } else {
            self.alerts.log(AlertLevel::Error, &summary);
        }
        self.alerts.notify(ALERT_TITLE, "VPN ALERT", &summary, true);

        report
    }

    fn disable(&self, name: &str) -> KillOutcome {
        if let Err(e) = validate_interface_name(name) {
            warn!(interface = %name, %e, "refusing to run down command");
            return KillOutcome::Failed(e.to_string());
        }

        let (program, args) = self.command.argv(name);
        let mut last_reason = String::new();

        for attempt in 1..=self.attempts {
            match self.runner.run(program, &args) {
                Ok(out) if out.success => {
                    info!(interface = %name, attempt, "interface disabled");
                    return KillOutcome::Disabled;
                }
                Ok(out) => last_reason = out.failure_reason(),
                Err(e) => last_reason = format!("failed to execute {}: {}", program, e),
            }

            warn!(interface = %name, attempt, reason = %last_reason, "interface down failed");
            if attempt < self.attempts && !self.retry_delay.is_zero() {
                debug!(delay_ms = self.retry_delay.as_millis() as u64, "retrying");
                std::thread::sleep(self.retry_delay);
            }
        }

        KillOutcome::Failed(last_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingAlerts;
    use crate::exec::CommandOutput;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fails the first `n` runs for an interface, then succeeds.
    #[derive(Default)]
    struct FlakyRunner {
        failures_left: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FlakyRunner {
        fn failing(name: &str, times: u32) -> Self {
            let runner = Self::default();
            runner
                .failures_left
                .lock()
                .unwrap()
                .insert(name.to_string(), times);
            runner
        }
    }

    impl CommandRunner for FlakyRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
            let mut argv = vec![program.to_string()];
            argv.extend(args.iter().map(|a| a.to_string()));
            self.calls.lock().unwrap().push(argv);

            let name = args.iter().find(|a| a.starts_with("en")).copied().unwrap_or("");
            let mut left = self.failures_left.lock().unwrap();
            match left.get_mut(name) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Ok(CommandOutput::failed("SIOCSIFFLAGS: Device busy"))
                }
                _ => Ok(CommandOutput::ok("")),
            }
        }
    }

    fn controller(runner: Arc<FlakyRunner>, attempts: u32) -> (InterfaceController, Arc<RecordingAlerts>) {
        let alerts = Arc::new(RecordingAlerts::default());
        let ctl = InterfaceController::new(runner, alerts.clone(), DownCommand::Ifconfig)
            .with_attempts(attempts)
            .with_retry_delay(Duration::ZERO);
        (ctl, alerts)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn interface_name_rules() {
        assert!(is_valid_interface_name("utun0"));
        assert!(is_valid_interface_name("eth0.100"));
        assert!(is_valid_interface_name("wg-home_1"));
        assert!(!is_valid_interface_name(""));
        assert!(!is_valid_interface_name("en0; rm -rf /"));
        assert!(!is_valid_interface_name("averyveryverylongname"));
        assert!(validate_interface_name("en 0").is_err());
    }

    #[test]
    fn down_command_argv() {
        assert_eq!(DownCommand::Ifconfig.argv("en0"), ("ifconfig", vec!["en0", "down"]));
        assert_eq!(
            DownCommand::IpLink.argv("eth0"),
            ("ip", vec!["link", "set", "dev", "eth0", "down"])
        );
    }

    #[test]
    fn retries_until_success() {
        let runner = Arc::new(FlakyRunner::failing("en0", 2));
        let (ctl, _) = controller(runner.clone(), 3);

        let report = ctl.kill_all(&names(&["en0"]));
        assert!(report.is_success());
        assert_eq!(runner.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn gives_up_after_attempts_and_keeps_reason() {
        let runner = Arc::new(FlakyRunner::failing("en1", 10));
        let (ctl, alerts) = controller(runner.clone(), 2);

        let report = ctl.kill_all(&names(&["en0", "en1", "en2"]));
        assert_eq!(report.disabled(), vec!["en0", "en2"]);
        assert_eq!(report.failed(), vec!["en1"]);
        assert_eq!(
            report.outcomes[1].outcome,
            KillOutcome::Failed("SIOCSIFFLAGS: Device busy".into())
        );
        assert!(matches!(
            report.result(),
            Err(KillSwitchError::InterfaceDown { ref failed }) if failed == &["en1".to_string()]
        ));
        // en0 once, en1 twice, en2 once
        assert_eq!(runner.calls.lock().unwrap().len(), 4);

        let notes = alerts.notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].play_sound);
        assert!(notes[0].message.contains("en1: FAILED"));
        assert!(alerts.logged(AlertLevel::Error));
    }

    #[test]
    fn invalid_name_fails_without_spawning() {
        let runner = Arc::new(FlakyRunner::default());
        let (ctl, _) = controller(runner.clone(), 3);

        let report = ctl.kill_all(&names(&["bad name"]));
        assert_eq!(report.failed(), vec!["bad name"]);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn summary_starts_with_timestamp_line() {
        let runner = Arc::new(FlakyRunner::default());
        let (ctl, _) = controller(runner, 1);

        let report = ctl.kill_all(&names(&["en0"]));
        let summary = report.summary();
        let first = summary.lines().next().unwrap();
        assert!(first.starts_with("VPN connection died at: "));
        assert!(summary.contains("en0: disabled"));
        assert_eq!(report.to_string(), "disabled [en0], failed []");
    }
}
