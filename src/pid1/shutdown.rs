//! Orderly shutdown sequence for PID 1
//!
//! Runs once the runtime has been reaped:
//! 1. Sync filesystems
//! 2. Disable core dumps
//! 3. Send SIGTERM to all processes, wait a second
//! 4. Send SIGKILL to stragglers, sync
//! 5. Write the shutdown report (optional)
//! 6. Unmount filesystems (in reverse order)
//! 7. Final sync
//! 8. Call reboot() syscall
//!
//! Every step is best effort. Only the final reboot() call can stop the
//! sequence, and it only returns on failure.

use nix::errno::Errno;
use nix::sys::reboot::{reboot, RebootMode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{sync, Pid};
use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::supervisor::ExitOutcome;
use super::unmount::{self, MountEntry, Unmounter};

/// Terminal kernel directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Reboot the system
    Restart,
    /// Halt (stop, don't power off)
    Halt,
    /// Power off the system
    PowerOff,
}

impl ShutdownAction {
    fn to_reboot_mode(self) -> RebootMode {
        match self {
            ShutdownAction::Restart => RebootMode::RB_AUTOBOOT,
            ShutdownAction::Halt => RebootMode::RB_HALT_SYSTEM,
            ShutdownAction::PowerOff => RebootMode::RB_POWER_OFF,
        }
    }
}

impl fmt::Display for ShutdownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownAction::Restart => "restart",
            ShutdownAction::Halt => "halt",
            ShutdownAction::PowerOff => "power off",
        })
    }
}

/// Teardown settings
#[derive(Debug, Clone)]
pub struct TeardownConfig {
    /// Where to write the shutdown report, if anywhere
    pub report_path: Option<PathBuf>,
    /// Pause between the SIGTERM and SIGKILL broadcasts
    pub kill_grace: Duration,
    /// Pause before halting/powering off after an unexpected exit
    pub exit_notice: Duration,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            report_path: None,
            kill_grace: Duration::from_secs(1),
            exit_notice: Duration::from_secs(5),
        }
    }
}

/// Kernel operations used during teardown
pub trait Kernel: Unmounter {
    fn sync(&mut self);
    fn disable_core_dumps(&mut self) -> io::Result<()>;
    /// Broadcast `signal` to every process except init
    fn kill_all(&mut self, signal: Signal) -> Result<(), Errno>;
    fn pause(&mut self, duration: Duration);
    fn mount_table(&mut self) -> io::Result<Vec<MountEntry>>;
    fn write_report(&mut self, path: &Path, outcome: &ExitOutcome) -> io::Result<()>;
    /// Issue the terminal directive; returns only on failure
    fn reboot(&mut self, action: ShutdownAction, args: Option<&str>) -> Errno;
}

/// The running Linux kernel
#[derive(Debug, Default)]
pub struct LinuxKernel;

const CORE_PATTERN: &str = "/proc/sys/kernel/core_pattern";

impl Unmounter for LinuxKernel {
    fn unmount(&mut self, path: &str) -> Result<(), Errno> {
        nix::mount::umount(path)
    }
}

impl Kernel for LinuxKernel {
    fn sync(&mut self) {
        sync();
    }

    fn disable_core_dumps(&mut self) -> io::Result<()> {
        // Piping to a program that exits immediately discards the dump
        fs::write(CORE_PATTERN, "|/bin/false")
    }

    fn kill_all(&mut self, signal: Signal) -> Result<(), Errno> {
        // PID -1 means every process we may signal, which for init is all
        kill(Pid::from_raw(-1), signal)
    }

    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn mount_table(&mut self) -> io::Result<Vec<MountEntry>> {
        unmount::list_mounts()
    }

    fn write_report(&mut self, path: &Path, outcome: &ExitOutcome) -> io::Result<()> {
        crate::report::write_report(path, outcome)
    }

    fn reboot(&mut self, action: ShutdownAction, args: Option<&str>) -> Errno {
        match args {
            Some(args) => restart_with_args(args),
            None => match reboot(action.to_reboot_mode()) {
                Ok(never) => match never {},
                Err(e) => e,
            },
        }
    }
}

/// `LINUX_REBOOT_CMD_RESTART2`, which nix does not wrap
fn restart_with_args(args: &str) -> Errno {
    let arg = match CString::new(args) {
        Ok(arg) => arg,
        Err(_) => {
            log::warn!("Restart arguments contain a NUL byte, restarting without them");
            return match reboot(RebootMode::RB_AUTOBOOT) {
                Ok(never) => match never {},
                Err(e) => e,
            };
        }
    };
    unsafe {
        libc::syscall(
            libc::SYS_reboot,
            libc::LINUX_REBOOT_MAGIC1,
            libc::LINUX_REBOOT_MAGIC2,
            libc::LINUX_REBOOT_CMD_RESTART2,
            arg.as_ptr(),
        );
    }
    Errno::last()
}

/// Execute the teardown sequence
///
/// Returns only if the final reboot() call failed.
pub fn teardown<K: Kernel>(kernel: &mut K, outcome: &ExitOutcome, config: &TeardownConfig) -> Errno {
    let action = outcome.desired_action;
    log::info!("Initiating {} sequence", action);

    kernel.sync();

    // Dumps from processes killed below would only slow shutdown down
    if let Err(e) = kernel.disable_core_dumps() {
        log::debug!("Could not disable core dumps: {}", e);
    }

    terminate_all_processes(kernel, config.kill_grace);

    if let Some(path) = &config.report_path {
        log::debug!("Writing shutdown report to '{}'", path.display());
        if let Err(e) = kernel.write_report(path, outcome) {
            log::warn!("Failed to write shutdown report to '{}': {}", path.display(), e);
        }
    }

    unmount_filesystems(kernel);

    kernel.sync();

    if !outcome.intentional && action != ShutdownAction::Restart {
        // Runtimes that crash during boot are easier to debug when the
        // console stops scrolling
        log::warn!("Not rebooting on exit as requested by the beaminit configuration...");
        kernel.pause(config.exit_notice);
    }

    match &outcome.reboot_args {
        Some(args) => log::info!("Executing {} ({})", action, args),
        None => log::info!("Executing {}", action),
    }
    kernel.reboot(action, outcome.reboot_args.as_deref())
}

/// Send SIGTERM then SIGKILL to all processes
fn terminate_all_processes<K: Kernel>(kernel: &mut K, grace: Duration) {
    log::warn!("Sending SIGTERM to all processes");
    broadcast(kernel, Signal::SIGTERM);
    kernel.pause(grace);

    log::warn!("Sending SIGKILL to all processes");
    broadcast(kernel, Signal::SIGKILL);
    kernel.sync();
}

fn broadcast<K: Kernel>(kernel: &mut K, signal: Signal) {
    match kernel.kill_all(signal) {
        Ok(()) => {}
        // Nothing left to signal
        Err(Errno::ESRCH) => log::debug!("No processes left for {}", signal),
        Err(e) => log::warn!("Failed to broadcast {}: {}", signal, e),
    }
}

fn unmount_filesystems<K: Kernel>(kernel: &mut K) {
    log::debug!("Unmounting filesystems");

    let mounts = match kernel.mount_table() {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Cannot read mount table: {}", e);
            return;
        }
    };

    let summary = unmount::unmount_all(&mounts, kernel);
    if !summary.failed.is_empty() {
        log::warn!(
            "{} of {} filesystems still mounted",
            summary.failed.len(),
            summary.attempted.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reboot_modes() {
        assert_eq!(ShutdownAction::Restart.to_reboot_mode(), RebootMode::RB_AUTOBOOT);
        assert_eq!(ShutdownAction::Halt.to_reboot_mode(), RebootMode::RB_HALT_SYSTEM);
        assert_eq!(ShutdownAction::PowerOff.to_reboot_mode(), RebootMode::RB_POWER_OFF);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(ShutdownAction::Restart.to_string(), "restart");
        assert_eq!(ShutdownAction::Halt.to_string(), "halt");
        assert_eq!(ShutdownAction::PowerOff.to_string(), "power off");
    }

    #[test]
    fn test_default_teardown_config() {
        let config = TeardownConfig::default();
        assert!(config.report_path.is_none());
        assert_eq!(config.kill_grace, Duration::from_secs(1));
    }
}
