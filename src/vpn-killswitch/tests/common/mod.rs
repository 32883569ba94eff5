//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use vpn_killswitch::{
    notification_key, AlertLevel, AlertSink, ChangeEvent, ChangeWatcher, CommandOutput,
    CommandRunner, DefaultRouteSource, DownCommand, InterfaceController, KillSwitchError,
    KillSwitchMonitor, KillTarget,
};

pub const VPN: &str = "utun0";

pub fn vpn_key() -> String {
    notification_key(VPN)
}

pub fn vpn_up() -> ChangeEvent {
    ChangeEvent::present(vpn_key(), vec![std::net::Ipv4Addr::new(10, 8, 0, 2)])
}

pub fn vpn_down() -> ChangeEvent {
    ChangeEvent::absent(vpn_key())
}

/// Watcher whose events are pushed by the test through a channel.
pub struct ScriptedWatcher {
    rx: Option<mpsc::Receiver<ChangeEvent>>,
    fail_with: Option<String>,
    pub subscribed: Vec<String>,
    pub unsubscribes: usize,
}

impl ScriptedWatcher {
    pub fn new() -> (Self, mpsc::Sender<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let watcher = Self {
            rx: Some(rx),
            fail_with: None,
            subscribed: Vec::new(),
            unsubscribes: 0,
        };
        (watcher, tx)
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            rx: None,
            fail_with: Some(reason.to_string()),
            subscribed: Vec::new(),
            unsubscribes: 0,
        }
    }
}

#[async_trait]
impl ChangeWatcher for ScriptedWatcher {
    async fn subscribe(&mut self, interface: &str) -> vpn_killswitch::Result<mpsc::Receiver<ChangeEvent>> {
        if let Some(reason) = &self.fail_with {
            return Err(KillSwitchError::Subscription(reason.clone()));
        }
        self.subscribed.push(interface.to_string());
        self.rx
            .take()
            .ok_or_else(|| KillSwitchError::Subscription("already subscribed".into()))
    }

    async fn unsubscribe(&mut self) {
        self.unsubscribes += 1;
    }
}

/// Routing table that the test can rewrite between queries.
#[derive(Default)]
pub struct FakeRoutes {
    table: Mutex<Vec<String>>,
    queries: Mutex<usize>,
}

impl FakeRoutes {
    pub fn with(names: &[&str]) -> Arc<Self> {
        let routes = Arc::new(Self::default());
        routes.set(names);
        routes
    }

    pub fn set(&self, names: &[&str]) {
        *self.table.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

impl DefaultRouteSource for FakeRoutes {
    fn default_route_interfaces(&self) -> vpn_killswitch::Result<Vec<String>> {
        *self.queries.lock().unwrap() += 1;
        Ok(self.table.lock().unwrap().clone())
    }
}

/// Records every down command; fails for the configured interfaces.
#[derive(Default)]
pub struct RecordingRunner {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn failing(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Interface names in the order their down commands ran.
    pub fn downed(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        assert_eq!(program, "ifconfig");
        let name = args[0].to_string();
        self.calls.lock().unwrap().push(name.clone());
        if self.failing.contains(&name) {
            Ok(CommandOutput::failed(format!(
                "ifconfig: interface {} does not exist",
                name
            )))
        } else {
            Ok(CommandOutput::ok(""))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Note {
    pub subtitle: String,
    pub message: String,
}

/// Alert sink that keeps everything in memory.
#[derive(Default)]
pub struct RecordingAlerts {
    notes: Mutex<Vec<Note>>,
    lines: Mutex<Vec<(AlertLevel, String)>>,
}

impl RecordingAlerts {
    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }

    pub fn lines(&self, level: AlertLevel) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn notify(&self, _title: &str, subtitle: &str, message: &str, _play_sound: bool) {
        self.notes.lock().unwrap().push(Note {
            subtitle: subtitle.to_string(),
            message: message.to_string(),
        });
    }

    fn log(&self, level: AlertLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

/// Everything a scenario needs to inspect after a run.
pub struct Harness {
    pub monitor: KillSwitchMonitor,
    pub routes: Arc<FakeRoutes>,
    pub runner: Arc<RecordingRunner>,
    pub alerts: Arc<RecordingAlerts>,
}

pub fn harness(target: KillTarget, routes: &[&str], failing: &[&str]) -> Harness {
    let routes = FakeRoutes::with(routes);
    let runner = RecordingRunner::failing(failing);
    let alerts = Arc::new(RecordingAlerts::default());
    let controller = InterfaceController::new(runner.clone(), alerts.clone(), DownCommand::Ifconfig)
        .with_retry_delay(Duration::ZERO);
    let monitor = KillSwitchMonitor::new(VPN, target, routes.clone(), controller, alerts.clone());
    Harness {
        monitor,
        routes,
        runner,
        alerts,
    }
}
