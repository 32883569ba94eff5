//! # VPN Kill Switch
//!
//! Watches the IPv4 state of a VPN interface and brings other network
//! interfaces down the moment the VPN loses its address, so no traffic
//! leaks over the bare uplink.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  ChangeEvent   ┌───────────────────┐
//! │  NetmonWatcher   │───────────────▶│ KillSwitchMonitor │
//! │ (netlink/route   │   (mpsc)       │  Idle → Watching  │
//! │  socket + probe) │                │  → Killing → Done │
//! └──────────────────┘                └─────────┬─────────┘
//!                                               │ kill target
//!                       ┌───────────────────────┼──────────────────────┐
//!                       ▼                       ▼                      ▼
//!              ┌─────────────────┐   ┌─────────────────────┐   ┌──────────────┐
//!              │ RouteTable      │   │ InterfaceController │   │ SystemAlerts │
//!              │ Inspector       │   │ ifconfig / ip link  │   │ log + notify │
//!              └─────────────────┘   └─────────────────────┘   └──────────────┘
//! ```
//!
//! The kill fires at most once per run. Dynamic targets are resolved from
//! the routing table at kill time, never cached.

/// Operator alerts: log lines and desktop notifications
pub mod alert;
/// Command line and TOML configuration
pub mod config;
/// Error type and exit codes
pub mod error;
/// Subprocess execution seam
pub mod exec;
/// Interface name validation and the interface-down controller
pub mod interface;
/// Event loop and signal handling
pub mod lifecycle;
/// tracing subscriber setup
pub mod logging;
/// Kill switch state machine
pub mod monitor;
/// Root privilege check
pub mod privilege;
/// Default route discovery
pub mod routes;
/// Network change subscription
pub mod watcher;

pub use alert::{AlertLevel, AlertSink, SystemAlerts, ALERT_TITLE};
pub use config::{Args, FileConfig, Settings};
pub use error::{KillSwitchError, Result};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use interface::{DownCommand, InterfaceController, KillOutcome, KillReport};
pub use monitor::{KillSwitchMonitor, KillTarget, MonitorState, RunOutcome};
pub use routes::{DefaultRouteSource, RouteTableFormat, RouteTableInspector};
pub use watcher::{notification_key, ChangeEvent, ChangeWatcher, NetmonWatcher};
