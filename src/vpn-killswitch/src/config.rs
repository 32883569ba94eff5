//! Command line and config file handling
//!
//! Every setting can come from the command line or from an optional TOML
//! file. The command line wins over the file, the file wins over the
//! built-in defaults.
//!
//! ```toml
//! mon = "utun2"
//! kill = ["en0", "en1"]
//! log = "/var/log/kill_switch.log"
//! heartbeat_secs = 1
//! down_attempts = 3
//! notify = true
//! ```

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KillSwitchError, Result};
use crate::interface::{validate_interface_name, DEFAULT_DOWN_ATTEMPTS};
use crate::lifecycle::HEARTBEAT_INTERVAL;
use crate::monitor::{KillTarget, DEFAULT_MONITORED_INTERFACE};

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "vpn-killswitch",
    version,
    about = "Disables network interfaces the moment your VPN connection drops"
)]
pub struct Args {
    /// VPN interface to monitor [default: utun0]
    #[arg(short, long, value_name = "IFACE")]
    pub mon: Option<String>,

    /// Comma separated interfaces to disable when the VPN drops
    /// (default: the interfaces holding a default route at that moment)
    #[arg(short, long, value_name = "IFACES", value_delimiter = ',')]
    pub kill: Option<Vec<String>>,

    /// Also append log lines to this file (truncated at startup)
    #[arg(short, long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Event loop heartbeat and address re-check period in seconds
    #[arg(long, value_name = "SECS")]
    pub heartbeat_secs: Option<u64>,

    /// Tries per interface before giving up on bringing it down
    #[arg(long, value_name = "N")]
    pub down_attempts: Option<u32>,

    /// Log only, never show desktop notifications
    #[arg(long)]
    pub no_notify: bool,
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mon: Option<String>,
    pub kill: Option<Vec<String>>,
    pub log: Option<PathBuf>,
    pub heartbeat_secs: Option<u64>,
    pub down_attempts: Option<u32>,
    pub notify: Option<bool>,
}

/// Read and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let data = fs::read_to_string(path).map_err(|e| {
        KillSwitchError::Config(format!("reading config {}: {}", path.display(), e))
    })?;
    let cfg: FileConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub monitor: String,
    pub target: KillTarget,
    pub log_file: Option<PathBuf>,
    pub heartbeat: Duration,
    pub down_attempts: u32,
    pub notifications: bool,
}

impl Settings {
    /// Load the config file named by `args` (if any) and merge.
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_config(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Merge CLI arguments over file values over defaults, then validate.
    pub fn merge(args: &Args, file: FileConfig) -> Result<Self> {
        let monitor = args
            .mon
            .clone()
            .or(file.mon)
            .map(|m| m.trim().to_string())
            .unwrap_or_else(|| DEFAULT_MONITORED_INTERFACE.to_string());
        validate_interface_name(&monitor)?;

        let target = match args.kill.as_ref().or(file.kill.as_ref()) {
            Some(names) => KillTarget::from_names(names)?,
            None => KillTarget::Dynamic,
        };

        let heartbeat_secs = args
            .heartbeat_secs
            .or(file.heartbeat_secs)
            .unwrap_or(HEARTBEAT_INTERVAL.as_secs());
        if heartbeat_secs == 0 {
            return Err(KillSwitchError::Config(
                "heartbeat_secs must be at least 1".into(),
            ));
        }

        let down_attempts = args
            .down_attempts
            .or(file.down_attempts)
            .unwrap_or(DEFAULT_DOWN_ATTEMPTS);
        if down_attempts == 0 {
            return Err(KillSwitchError::Config(
                "down_attempts must be at least 1".into(),
            ));
        }

        Ok(Self {
            monitor,
            target,
            log_file: args.log.clone().or(file.log),
            heartbeat: Duration::from_secs(heartbeat_secs),
            down_attempts,
            notifications: !args.no_notify && file.notify.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("vpn-killswitch").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let s = Settings::merge(&Args::default(), FileConfig::default()).unwrap();
        assert_eq!(s.monitor, "utun0");
        assert_eq!(s.target, KillTarget::Dynamic);
        assert_eq!(s.log_file, None);
        assert_eq!(s.heartbeat, Duration::from_secs(1));
        assert_eq!(s.down_attempts, 3);
        assert!(s.notifications);
    }

    #[test]
    fn kill_list_is_split_and_normalised() {
        let args = parse(&["-m", "utun3", "-k", "eth0, eth1,,eth0"]);
        let s = Settings::merge(&args, FileConfig::default()).unwrap();
        assert_eq!(s.monitor, "utun3");
        assert_eq!(
            s.target,
            KillTarget::Static(vec!["eth0".into(), "eth1".into()])
        );
    }

    #[test]
    fn empty_kill_list_is_rejected() {
        let args = parse(&["--kill", ","]);
        let err = Settings::merge(&args, FileConfig::default()).unwrap_err();
        assert!(matches!(err, KillSwitchError::Config(_)));
    }

    #[test]
    fn bad_monitored_name_is_rejected() {
        let args = parse(&["--mon", "utun0;reboot"]);
        assert!(Settings::merge(&args, FileConfig::default()).is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let file = FileConfig {
            mon: Some("utun7".into()),
            kill: Some(vec!["en5".into()]),
            heartbeat_secs: Some(5),
            notify: Some(false),
            ..Default::default()
        };
        let args = parse(&["--kill", "en0", "--heartbeat-secs", "2"]);
        let s = Settings::merge(&args, file).unwrap();
        assert_eq!(s.monitor, "utun7");
        assert_eq!(s.target, KillTarget::Static(vec!["en0".into()]));
        assert_eq!(s.heartbeat, Duration::from_secs(2));
        assert!(!s.notifications);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(Settings::merge(&parse(&["--heartbeat-secs", "0"]), FileConfig::default()).is_err());
        assert!(Settings::merge(&parse(&["--down-attempts", "0"]), FileConfig::default()).is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mon = \"utun2\"\nkill = [\"en0\", \"en1\"]\ndown_attempts = 5\nnotify = false"
        )
        .unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let s = Settings::resolve(&args).unwrap();
        assert_eq!(s.monitor, "utun2");
        assert_eq!(
            s.target,
            KillTarget::Static(vec!["en0".into(), "en1".into()])
        );
        assert_eq!(s.down_attempts, 5);
        assert!(!s.notifications);
    }

    #[test]
    fn unknown_keys_and_missing_files_are_config_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "monitor = \"utun2\"").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(KillSwitchError::Config(_))
        ));
        assert!(matches!(
            load_config(Path::new("/nonexistent/kill_switch.toml")),
            Err(KillSwitchError::Config(_))
        ));
    }
}
