//! Controlling terminal
//!
//! The runtime's shell needs a controlling terminal for job control, so
//! init starts a new session and points stdin/stdout/stderr at the console.

use nix::unistd::{dup2, setsid};
use std::fs::{self, OpenOptions};
use std::os::fd::AsRawFd;

const ACTIVE_CONSOLE: &str = "/sys/class/tty/console/active";

/// Make `tty` (or the active console) the controlling terminal
pub fn set_ctty(tty: Option<&str>) {
    log::debug!("set_ctty");
    if let Err(e) = setsid() {
        log::debug!("setsid failed: {}", e);
    }

    let name = match tty {
        Some(tty) => tty.to_string(),
        None => active_console(),
    };
    let path = format!("/dev/{}", name);

    let file = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("error setting controlling terminal: {} ({})", path, e);
            return;
        }
    };

    for fd in 0..=2 {
        if let Err(e) = dup2(file.as_raw_fd(), fd) {
            log::warn!("dup2 onto fd {} failed: {}", fd, e);
        }
    }
}

/// First entry of the kernel's active console list
fn active_console() -> String {
    fs::read_to_string(ACTIVE_CONSOLE)
        .map(|s| first_console(&s).to_string())
        .unwrap_or_default()
}

fn first_console(active: &str) -> &str {
    active.split_whitespace().next().unwrap_or("")
}
