//! Network change subscription
//!
//! A [`ChangeWatcher`] delivers [`ChangeEvent`]s for exactly one notification
//! key, `State:/Network/Interface/<name>/IPv4`. The value carried by an
//! event is the interface's current IPv4 address list, or `None` when the
//! interface has no IPv4 address (or no longer exists).
//!
//! [`NetmonWatcher`] is the platform adapter: OS route/address change
//! notifications (netlink on Linux, the routing socket on macOS/BSD) trigger
//! a sample of the interface's addresses, and an event is emitted only when
//! that sample differs from the previous one. A reconcile tick re-samples
//! periodically so a dropped OS notification cannot hide a VPN drop.

use async_trait::async_trait;
use futures::StreamExt;
use n0_watcher::Watcher as _;
use netwatch::netmon;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{KillSwitchError, Result};
use crate::interface::validate_interface_name;

/// Capacity of the event channel between the OS callbacks and the monitor.
const EVENT_BUFFER: usize = 32;

/// Default reconcile period.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Notification key for an interface's IPv4 state.
pub fn notification_key(interface: &str) -> String {
    format!("State:/Network/Interface/{}/IPv4", interface)
}

/// A change notification for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Notification key the value belongs to
    pub key: String,
    /// Current IPv4 addresses, `None` when absent
    pub value: Option<Vec<Ipv4Addr>>,
}

impl ChangeEvent {
    pub fn present(key: impl Into<String>, addrs: Vec<Ipv4Addr>) -> Self {
        Self {
            key: key.into(),
            value: Some(addrs),
        }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// True when this event reports `key` with no value.
    pub fn is_drop_of(&self, key: &str) -> bool {
        self.key == key && self.value.is_none()
    }
}

/// Subscription to change notifications for a single interface.
#[async_trait]
pub trait ChangeWatcher: Send {
    /// Register for changes of `interface`'s IPv4 state.
    ///
    /// The returned channel closes when the subscription is torn down or the
    /// underlying OS source fails.
    async fn subscribe(&mut self, interface: &str) -> Result<mpsc::Receiver<ChangeEvent>>;

    /// Release the OS registration. Safe to call more than once.
    async fn unsubscribe(&mut self);
}

/// Reads the current IPv4 addresses of an interface.
pub trait AddressProbe: Send + Sync {
    /// Sorted IPv4 addresses, `None` when the interface has none or is missing.
    fn ipv4_addresses(&self, interface: &str) -> Option<Vec<Ipv4Addr>>;
}

/// Probe backed by the OS interface list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl AddressProbe for SystemProbe {
    fn ipv4_addresses(&self, interface: &str) -> Option<Vec<Ipv4Addr>> {
        let iface = netdev::get_interfaces()
            .into_iter()
            .find(|i| i.name == interface)?;
        let mut addrs: Vec<Ipv4Addr> = iface.ipv4.iter().map(|net| net.addr()).collect();
        if addrs.is_empty() {
            return None;
        }
        addrs.sort_unstable();
        addrs.dedup();
        Some(addrs)
    }
}

/// Turns raw "something changed" signals into per-key events.
pub(crate) struct KeyBridge {
    key: String,
    interface: String,
    probe: Arc<dyn AddressProbe>,
    last: Mutex<Option<Vec<Ipv4Addr>>>,
    tx: mpsc::Sender<ChangeEvent>,
}

impl KeyBridge {
    pub(crate) fn new(
        interface: &str,
        probe: Arc<dyn AddressProbe>,
        tx: mpsc::Sender<ChangeEvent>,
    ) -> Self {
        let initial = probe.ipv4_addresses(interface);
        Self {
            key: notification_key(interface),
            interface: interface.to_string(),
            probe,
            last: Mutex::new(initial),
            tx,
        }
    }

    pub(crate) fn current(&self) -> Option<Vec<Ipv4Addr>> {
        self.last.lock().map(|v| v.clone()).unwrap_or(None)
    }

    /// Sample the interface; returns an event when the value changed.
    pub(crate) fn sample(&self) -> Option<ChangeEvent> {
        let value = self.probe.ipv4_addresses(&self.interface);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == value {
            return None;
        }
        *last = value.clone();
        Some(ChangeEvent {
            key: self.key.clone(),
            value,
        })
    }

    /// Sample and forward a change. Returns false once the receiver is gone.
    pub(crate) async fn forward(&self) -> bool {
        match self.sample() {
            Some(event) => {
                debug!(key = %event.key, value = ?event.value, "interface address state changed");
                self.tx.send(event).await.is_ok()
            }
            None => !self.tx.is_closed(),
        }
    }
}

/// [`ChangeWatcher`] backed by the OS network monitor.
pub struct NetmonWatcher {
    probe: Arc<dyn AddressProbe>,
    reconcile_interval: Duration,
    monitor: Option<netmon::Monitor>,
    changes: Option<JoinHandle<()>>,
    reconcile: Option<JoinHandle<()>>,
}

impl NetmonWatcher {
    pub fn new(reconcile_interval: Duration) -> Self {
        Self::with_probe(Arc::new(SystemProbe), reconcile_interval)
    }

    pub fn with_probe(probe: Arc<dyn AddressProbe>, reconcile_interval: Duration) -> Self {
        Self {
            probe,
            reconcile_interval: reconcile_interval.max(Duration::from_millis(100)),
            monitor: None,
            changes: None,
            reconcile: None,
        }
    }

    fn abort_tasks(&mut self) {
        for handle in [self.changes.take(), self.reconcile.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl Default for NetmonWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_RECONCILE_INTERVAL)
    }
}

#[async_trait]
impl ChangeWatcher for NetmonWatcher {
    async fn subscribe(&mut self, interface: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        validate_interface_name(interface)
            .map_err(|e| KillSwitchError::Subscription(e.to_string()))?;
        if self.monitor.is_some() {
            return Err(KillSwitchError::Subscription(
                "watcher is already subscribed".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let bridge = Arc::new(KeyBridge::new(interface, self.probe.clone(), tx));

        match bridge.current() {
            Some(addrs) => info!(interface = %interface, addrs = ?addrs, "monitored interface is up"),
            None => warn!(
                interface = %interface,
                "monitored interface has no IPv4 address; waiting for it to come up"
            ),
        }

        let monitor = netmon::Monitor::new()
            .await
            .map_err(|e| KillSwitchError::Subscription(e.to_string()))?;

        let mut states = monitor.interface_state().stream_updates_only();
        let change_bridge = bridge.clone();
        let changes = tokio::spawn(async move {
            while states.next().await.is_some() {
                trace!("network change notification");
                if !change_bridge.forward().await {
                    return;
                }
            }
            debug!("network monitor stream ended");
        });

        let period = self.reconcile_interval;
        let reconcile = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !bridge.forward().await {
                    break;
                }
            }
        });

        info!(key = %notification_key(interface), "subscribed to network changes");
        self.monitor = Some(monitor);
        self.changes = Some(changes);
        self.reconcile = Some(reconcile);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) {
        self.abort_tasks();
        if self.monitor.take().is_some() {
            debug!("network monitor released");
        }
    }
}

impl Drop for NetmonWatcher {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
