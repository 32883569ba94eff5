//! Error types for the kill switch.
//!
//! Every fallible operation returns [`Result<T>`] which wraps [`KillSwitchError`].
//! Each variant maps to a stable process exit code via [`KillSwitchError::exit_code`].

use thiserror::Error;

/// Exit code for a privilege precheck failure.
pub const EXIT_PRIVILEGE: u8 = 1;
/// Exit code when the change subscription could not be registered or died.
pub const EXIT_SUBSCRIPTION: u8 = 3;
/// Exit code when no kill target could be resolved at kill time.
pub const EXIT_NO_TARGET: u8 = 4;
/// Exit code when at least one interface failed to go down.
pub const EXIT_INTERFACE_DOWN: u8 = 5;
/// Exit code for configuration and I/O problems during setup.
pub const EXIT_SETUP: u8 = 6;

/// Error type for all kill switch operations.
#[derive(Debug, Error)]
pub enum KillSwitchError {
    /// Registering for network change notifications failed
    #[error("cannot subscribe to network changes: {0}")]
    Subscription(String),

    /// Dynamic resolution found no default-route interface at kill time
    #[error("no default-route interface found to disable")]
    NoTarget,

    /// One or more interfaces stayed up after the kill batch
    #[error("failed to disable {}", failed.join(", "))]
    InterfaceDown {
        /// Names of the interfaces that could not be brought down
        failed: Vec<String>,
    },

    /// The process lacks the privileges needed to reconfigure interfaces
    #[error("insufficient privileges: {0}")]
    Privilege(String),

    /// Invalid configuration (CLI or file)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File system or process I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KillSwitchError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            KillSwitchError::Privilege(_) => EXIT_PRIVILEGE,
            KillSwitchError::Subscription(_) => EXIT_SUBSCRIPTION,
            KillSwitchError::NoTarget => EXIT_NO_TARGET,
            KillSwitchError::InterfaceDown { .. } => EXIT_INTERFACE_DOWN,
            KillSwitchError::Config(_) | KillSwitchError::Io(_) => EXIT_SETUP,
        }
    }
}

/// Result type alias for kill switch operations.
pub type Result<T> = std::result::Result<T, KillSwitchError>;

impl From<toml::de::Error> for KillSwitchError {
    fn from(e: toml::de::Error) -> Self {
        KillSwitchError::Config(e.to_string())
    }
}
