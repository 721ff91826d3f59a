//! Logging to the kernel log
//!
//! There is no syslog this early, so records go to /dev/kmsg where they
//! survive in dmesg and on the console. If /dev/kmsg can't be opened the
//! record goes to stderr instead.

use std::fs::OpenOptions;
use std::io::{self, Write};

const KMSG: &str = "/dev/kmsg";

/// Writes each record as a single kmsg entry
///
/// A record may arrive in several `write` calls; it is emitted once the
/// line separator (or a flush) completes it.
#[derive(Default)]
struct KmsgWriter {
    pending: Vec<u8>,
}

impl KmsgWriter {
    fn emit(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // Reopened per record so logging works before and after /dev is ready
        let result = match OpenOptions::new().write(true).open(KMSG) {
            Ok(mut f) => f.write_all(&self.pending),
            Err(_) => io::stderr().write_all(&self.pending),
        };
        self.pending.clear();
        result
    }
}

impl Write for KmsgWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if self.pending.ends_with(b"\n") {
            self.emit()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit()
    }
}

/// Install the logger; warnings and errors only until `set_verbose`
pub fn init() -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, _record| out.finish(format_args!("beaminit: {}", message)))
        .level(log::LevelFilter::Trace)
        .chain(fern::Output::writer(Box::new(KmsgWriter::default()), "\n"))
        .apply()?;
    log::set_max_level(log::LevelFilter::Warn);
    Ok(())
}

/// Enable debug output (`-v`)
pub fn set_verbose(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    log::set_max_level(level);
}
