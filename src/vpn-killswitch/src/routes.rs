//! Default route inspection
//!
//! Reads a routing table snapshot and extracts the interfaces that carry a
//! default route. Two text formats are understood:
//!
//! - `netstat -rn` (BSD/macOS `Netif` column, Linux net-tools `Iface` column)
//! - iproute2 `ip route show default` (`dev <name>`, including multipath
//!   `nexthop` continuation lines)
//!
//! Multi-homed hosts routinely have several default routes (IPv4 + IPv6,
//! scoped routes per interface). All of them are returned, in table order,
//! without duplicates.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{KillSwitchError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::interface::is_valid_interface_name;

/// Source of the interfaces currently holding a default route.
pub trait DefaultRouteSource: Send + Sync {
    /// Interfaces with a default route, in routing table order.
    ///
    /// An empty vector means the table has no default route. Errors are
    /// reserved for failures to read the table at all.
    fn default_route_interfaces(&self) -> Result<Vec<String>>;
}

/// Routing table text format produced by the platform's query command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTableFormat {
    /// `netstat -rn`
    Netstat,
    /// `ip route show default` for IPv4 and IPv6
    IpRoute,
}

impl RouteTableFormat {
    /// Format used on the current platform.
    pub fn native() -> Self {
        if cfg!(target_os = "linux") {
            RouteTableFormat::IpRoute
        } else {
            RouteTableFormat::Netstat
        }
    }

    fn queries(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            RouteTableFormat::Netstat => &[("netstat", &["-rn"])],
            RouteTableFormat::IpRoute => &[
                ("ip", &["-4", "route", "show", "default"]),
                ("ip", &["-6", "route", "show", "default"]),
            ],
        }
    }

    /// Parse a table in this format.
    pub fn parse(&self, table: &str) -> Vec<String> {
        match self {
            RouteTableFormat::Netstat => parse_netstat(table),
            RouteTableFormat::IpRoute => parse_ip_route(table),
        }
    }
}

/// Queries the OS routing table through a [`CommandRunner`].
pub struct RouteTableInspector {
    runner: Arc<dyn CommandRunner>,
    format: RouteTableFormat,
}

impl RouteTableInspector {
    /// Inspector for the current platform using real subprocesses.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner), RouteTableFormat::native())
    }

    pub fn new(runner: Arc<dyn CommandRunner>, format: RouteTableFormat) -> Self {
        Self { runner, format }
    }
}

impl DefaultRouteSource for RouteTableInspector {
    fn default_route_interfaces(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut last_error = None;
        let mut any_ok = false;

        for (program, args) in self.format.queries() {
            match self.runner.run(program, args) {
                Ok(out) if out.success => {
                    any_ok = true;
                    found.extend(self.format.parse(&out.stdout));
                }
                Ok(out) => {
                    let reason = out.failure_reason();
                    warn!(cmd = %program, args = ?args, %reason, "routing table query failed");
                    last_error = Some(format!("{} {}: {}", program, args.join(" "), reason));
                }
                Err(e) => {
                    warn!(cmd = %program, %e, "routing table query could not run");
                    last_error = Some(format!("{}: {}", program, e));
                }
            }
        }

        if !any_ok {
            let reason = last_error.unwrap_or_else(|| "no routing table query ran".into());
            return Err(KillSwitchError::Io(std::io::Error::other(reason)));
        }

        let interfaces = dedup_in_order(found);
        debug!(interfaces = ?interfaces, "default route interfaces");
        Ok(interfaces)
    }
}

/// Extract default-route interfaces from `netstat -rn` output.
///
/// The interface column is located from the most recent header line
/// (`Netif` on BSD/macOS, `Iface` on Linux). Without a header the last
/// column of a `default` row is used.
pub fn parse_netstat(table: &str) -> Vec<String> {
    let mut iface_col: Option<usize> = None;
    let mut genmask_col: Option<usize> = None;
    let mut out = Vec::new();

    for line in table.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let Some(&destination) = cols.first() else {
            continue;
        };

        if destination == "Destination" {
            iface_col = cols.iter().position(|c| *c == "Netif" || *c == "Iface");
            genmask_col = cols.iter().position(|c| *c == "Genmask");
            continue;
        }

        let is_default = match destination {
            "default" | "0.0.0.0/0" | "::/0" => true,
            "0.0.0.0" => genmask_col
                .and_then(|i| cols.get(i))
                .map_or(true, |mask| *mask == "0.0.0.0"),
            _ => false,
        };
        if !is_default {
            continue;
        }

        let iface = match iface_col {
            Some(i) => cols.get(i).copied(),
            None => cols.last().copied(),
        };
        if let Some(name) = iface.filter(|n| is_valid_interface_name(n)) {
            out.push(name.to_string());
        }
    }

    dedup_in_order(out)
}

/// Extract default-route interfaces from iproute2 output.
pub fn parse_ip_route(table: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_default = false;

    for line in table.lines() {
        let continuation = line.starts_with(char::is_whitespace);
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.is_empty() {
            continue;
        }

        if !continuation {
            in_default = cols[0] == "default"
                || cols[0] == "0.0.0.0/0"
                || cols[0] == "::/0"
                || (cols[0] == "unicast" && cols.get(1) == Some(&"default"));
        } else if cols[0] != "nexthop" {
            continue;
        }

        if !in_default {
            continue;
        }

        let devs = cols
            .windows(2)
            .filter(|w| w[0] == "dev")
            .map(|w| w[1])
            .filter(|n| is_valid_interface_name(n));
        out.extend(devs.map(str::to_string));
    }

    dedup_in_order(out)
}

/// Remove duplicates, keeping the first occurrence.
pub(crate) fn dedup_in_order(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}
