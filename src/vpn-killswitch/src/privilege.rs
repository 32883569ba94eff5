//! Privilege check run before anything touches the network.

use crate::error::{KillSwitchError, Result};

/// Fails unless the process runs with an effective UID of 0.
#[cfg(unix)]
pub fn check_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    require_root(euid)
}

/// Interface control needs an elevated shell on this platform; the down
/// command reports the failure if it is missing.
#[cfg(not(unix))]
pub fn check_privileges() -> Result<()> {
    Ok(())
}

/// Verdict for a given effective UID.
pub fn require_root(euid: u32) -> Result<()> {
    if euid == 0 {
        Ok(())
    } else {
        Err(KillSwitchError::Privilege(format!(
            "running as euid {}, root is required to disable interfaces",
            euid
        )))
    }
}
