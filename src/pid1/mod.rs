//! PID 1 functionality
//!
//! Handles responsibilities specific to running as init (PID 1):
//! - Mounting essential filesystems
//! - Launching and supervising the runtime
//! - Zombie process reaping
//! - Signal handling
//! - Orderly shutdown

mod graceful;
mod launcher;
mod mount;
mod reaper;
mod shutdown;
mod signals;
mod supervisor;
mod unmount;

pub use graceful::{wait_for_exit, GracefulExit};
pub use launcher::{
    parse_limits, run_command, spawn, ChildHandle, LaunchError, LaunchPlan, ResourceLimit,
};
pub use mount::{mount_pseudo_filesystems, mount_runtime_filesystems, parse_mount_flags, ExtraMount};
pub use reaper::{ProcessTable, ReapedProcess, WaitResult, ZombieReaper};
pub use shutdown::{teardown, Kernel, LinuxKernel, ShutdownAction, TeardownConfig};
pub use signals::{EventSource, GateEvent, SignalError, SignalGate};
pub use supervisor::{
    read_reboot_args, ExitOutcome, Supervisor, SupervisorConfig, SupervisorState,
    DEFAULT_GRACEFUL_TIMEOUT, DEFAULT_REBOOT_PARAM_PATH,
};
pub use unmount::{
    list_mounts, parse_mount_table, unmount_all, MountEntry, UnmountSummary, Unmounter, MAX_MOUNTS,
};

use std::process;
use std::thread;
use std::time::Duration;

/// Check if we are running as PID 1
pub fn is_pid1() -> bool {
    process::id() == 1
}

/// Report an unrecoverable boot error and take the configured action
///
/// Exiting as PID 1 panics the kernel, so exit is only the last resort.
pub fn fatal(action: ShutdownAction, msg: &str) -> ! {
    log::error!("\n\nFATAL ERROR:\n{}\n\n", msg);
    log::error!("CANNOT CONTINUE. CHECK BEAMINIT CONFIGURATION");

    // Give the console a moment before everything goes away
    thread::sleep(Duration::from_secs(1));

    let err = LinuxKernel.reboot(action, None);
    log::error!("{} failed: {}", action, err);
    process::exit(1);
}

/// Tear the system down after the runtime has gone
pub fn finish(outcome: &ExitOutcome, config: &TeardownConfig) -> ! {
    let err = teardown(&mut LinuxKernel, outcome, config);
    log::error!("reboot({}) failed: {}", outcome.desired_action, err);
    process::exit(1);
}

#[derive(Debug, thiserror::Error)]
pub enum Pid1Error {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}
