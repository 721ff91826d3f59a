//! Mount table handling for shutdown
//!
//! `/proc/mounts` lists filesystems in mount order. Later mounts can sit on
//! top of earlier ones (/dev/pts inside /dev), so they come off in reverse.

use nix::errno::Errno;
use std::fs;
use std::io;

/// Most entries read from the mount table; the rest are left mounted
pub const MAX_MOUNTS: usize = 32;

const MOUNT_TABLE: &str = "/proc/mounts";

/// One line of the live mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
}

impl MountEntry {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Root filesystem and devtmpfs can't be unmounted while running
    pub fn is_pinned(&self) -> bool {
        matches!(self.source.as_str(), "devtmpfs" | "rootfs") || self.target == "/"
    }
}

/// Read the live mount table
pub fn list_mounts() -> io::Result<Vec<MountEntry>> {
    let content = fs::read_to_string(MOUNT_TABLE)?;
    Ok(parse_mount_table(&content))
}

/// Parse mount table content, keeping at most `MAX_MOUNTS` entries
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some(MountEntry::new(unescape(source), unescape(target)))
        })
        .take(MAX_MOUNTS)
        .collect()
}

/// Undo the kernel's octal escaping of spaces, tabs, newlines and backslashes
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Unmount operation used by the unmount pass
pub trait Unmounter {
    fn unmount(&mut self, path: &str) -> Result<(), Errno>;
}

/// What an unmount pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnmountSummary {
    /// Targets an unmount was attempted for, in order
    pub attempted: Vec<String>,
    /// Targets that stayed mounted
    pub failed: Vec<String>,
}

/// Unmount everything except pinned filesystems, newest mount first
///
/// Each target falls back to unmounting by source. Failures are logged and
/// the pass continues.
pub fn unmount_all<U: Unmounter>(entries: &[MountEntry], unmounter: &mut U) -> UnmountSummary {
    let mut summary = UnmountSummary::default();

    for entry in entries.iter().rev() {
        if entry.is_pinned() {
            continue;
        }

        log::debug!("unmounting {} at {}...", entry.source, entry.target);
        summary.attempted.push(entry.target.clone());

        if let Err(e) = unmounter.unmount(&entry.target) {
            if unmounter.unmount(&entry.source).is_err() {
                log::warn!("umount {} failed: {}", entry.target, e);
                summary.failed.push(entry.target.clone());
            }
        }
    }

    summary
}
