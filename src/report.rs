//! Shutdown diagnostics report
//!
//! A short markdown file describing why the system went down, followed by
//! the kernel log. Written during teardown when `--shutdown-report` is set.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use nix::time::{clock_gettime, ClockId};

use crate::pid1::{ExitOutcome, WaitResult};

/// Render and write the report for `outcome` to `path`
pub fn write_report(path: &Path, outcome: &ExitOutcome) -> io::Result<()> {
    let dmesg = read_kmsg();
    let report = render(outcome, uptime(), chrono::Utc::now(), dmesg.as_ref().map(String::as_str));
    fs::write(path, report)
}

/// Report text; `dmesg` is `Err` when the kernel log couldn't be read
pub fn render(
    outcome: &ExitOutcome,
    uptime: Duration,
    now: chrono::DateTime<chrono::Utc>,
    dmesg: Result<&str, &io::Error>,
) -> String {
    let mut out = String::new();
    let yes_no = |b: bool| if b { "yes" } else { "no" };

    let _ = writeln!(out, "# beaminit shutdown report\n");
    let _ = writeln!(out, "Uptime: {}", format_uptime(uptime));
    let _ = writeln!(out, "Current time: {}", now.format("%a %b %e %H:%M:%S %Y"));
    let _ = writeln!(out, "Intentional exit: {}", yes_no(outcome.intentional));
    let _ = writeln!(out, "Graceful shutdown succeeded: {}", yes_no(outcome.graceful_ok));
    match outcome.graceful_duration() {
        Some(d) if !d.is_zero() => {
            let _ = writeln!(out, "Graceful shutdown time: {:.3} seconds", d.as_secs_f64());
        }
        _ => {
            let _ = writeln!(out, "Graceful shutdown time: N/A");
        }
    }
    match outcome.wait_status {
        WaitResult::Exited(code) => {
            let _ = writeln!(out, "Runtime exit status: {}", code);
        }
        WaitResult::Signaled(sig) => {
            let _ = writeln!(out, "Runtime exited due to signal: {}", sig);
        }
        WaitResult::Unknown => {}
    }
    let _ = writeln!(out, "Shutdown action: {}", outcome.desired_action);
    if let Some(args) = &outcome.reboot_args {
        let _ = writeln!(out, "Reboot args: {}", args);
    }

    let _ = writeln!(out, "\n## dmesg\n");
    match dmesg {
        Ok(log) => {
            let _ = write!(out, "```\n{}```\n", log);
        }
        Err(e) => {
            let _ = writeln!(out, "Error opening /dev/kmsg: {}", e);
        }
    }

    out
}

/// `D days, H:MM:SS`
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    format!(
        "{} days, {}:{:02}:{:02}",
        days,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

fn uptime() -> Duration {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(Duration::from)
        .unwrap_or_default()
}

/// Drain the kernel ring buffer without blocking
fn read_kmsg() -> io::Result<String> {
    let mut kmsg = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open("/dev/kmsg")?;

    let mut messages = String::new();
    let mut record = [0u8; 8192];
    loop {
        // Each read returns exactly one record
        match kmsg.read(&mut record) {
            Ok(0) => break,
            Ok(n) => messages.push_str(&kmsg_message(&String::from_utf8_lossy(&record[..n]))),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EPIPE means a record was overwritten; skip it
            Err(e) if e.raw_os_error() == Some(libc::EPIPE) => continue,
            Err(_) => break,
        }
    }
    Ok(messages)
}

/// Message text of a kmsg record (`prio,seq,ts,flags;message\n`)
fn kmsg_message(record: &str) -> String {
    let Some((_, rest)) = record.split_once(';') else {
        return String::new();
    };
    // Continuation lines (" KEY=value") follow the first line
    let line = rest.lines().next().unwrap_or("");
    format!("{}\n", line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid1::ShutdownAction;
    use chrono::TimeZone;
    use std::time::Instant;

    fn outcome() -> ExitOutcome {
        let start = Instant::now();
        ExitOutcome {
            intentional: true,
            wait_status: WaitResult::Exited(0),
            graceful_ok: true,
            shutdown_started_at: Some(start),
            shutdown_completed_at: Some(start + Duration::from_millis(1500)),
            desired_action: ShutdownAction::Restart,
            reboot_args: Some("tryboot".to_string()),
        }
    }

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0 days, 0:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4 * 60 + 5)),
            "2 days, 3:04:05"
        );
    }

    #[test]
    fn test_kmsg_message() {
        assert_eq!(kmsg_message("6,339,5140900,-;NET: Registered\n"), "NET: Registered\n");
        assert_eq!(
            kmsg_message("7,160,424069,-;pci_root PNP0A03:00: host bridge\n SUBSYSTEM=acpi\n"),
            "pci_root PNP0A03:00: host bridge\n"
        );
        assert_eq!(kmsg_message("garbage"), "");
    }

    #[test]
    fn test_render_graceful_restart() {
        let report = render(&outcome(), Duration::from_secs(61), now(), Ok("booted\n"));
        assert!(report.starts_with("# beaminit shutdown report\n\n"));
        assert!(report.contains("Uptime: 0 days, 0:01:01\n"));
        assert!(report.contains("Current time: Tue Mar  5 07:08:09 2024\n"));
        assert!(report.contains("Intentional exit: yes\n"));
        assert!(report.contains("Graceful shutdown succeeded: yes\n"));
        assert!(report.contains("Graceful shutdown time: 1.500 seconds\n"));
        assert!(report.contains("Runtime exit status: 0\n"));
        assert!(report.contains("Shutdown action: restart\n"));
        assert!(report.contains("Reboot args: tryboot\n"));
        assert!(report.ends_with("## dmesg\n\n```\nbooted\n```\n"));
    }

    #[test]
    fn test_render_crash() {
        let mut crashed = outcome();
        crashed.intentional = false;
        crashed.graceful_ok = false;
        crashed.shutdown_started_at = None;
        crashed.shutdown_completed_at = None;
        crashed.wait_status = WaitResult::Signaled(9);
        crashed.desired_action = ShutdownAction::Halt;
        crashed.reboot_args = None;

        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        let report = render(&crashed, Duration::ZERO, now(), Err(&err));
        assert!(report.contains("Intentional exit: no\n"));
        assert!(report.contains("Graceful shutdown time: N/A\n"));
        assert!(report.contains("Runtime exited due to signal: 9\n"));
        assert!(report.contains("Shutdown action: halt\n"));
        assert!(!report.contains("Reboot args"));
        assert!(report.contains("Error opening /dev/kmsg: "));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_report(&path, &outcome()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Shutdown action: restart"));
        assert!(content.contains("## dmesg"));
    }
}
