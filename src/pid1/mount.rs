//! Early filesystem mounting for PID 1
//!
//! Mounts the virtual filesystems the runtime expects:
//! - /proc (process information)
//! - /sys (sysfs)
//! - /dev/pts (pseudo-terminals; /dev itself comes from the kernel)
//! - /tmp and /run (tmpfs)
//!
//! plus any `--mount` entries. Everything here is best effort: a missing
//! filesystem is logged and boot continues.

use nix::mount::{mount, MsFlags};
use nix::sys::stat::{umask, Mode};
use nix::unistd::mkdir;
use std::fs;
use std::path::Path;

/// Mount information for an essential filesystem
struct MountPoint {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const PSEUDO_MOUNTS: &[MountPoint] = &[
    // /proc - process information
    MountPoint {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_NOEXEC),
        data: None,
    },
    // /sys - sysfs
    MountPoint {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_NOEXEC),
        data: None,
    },
    // /dev/pts - pseudo-terminal devices
    MountPoint {
        source: "devpts",
        target: "/dev/pts",
        fstype: "devpts",
        flags: MsFlags::MS_NOSUID.union(MsFlags::MS_NOEXEC),
        data: Some("gid=5,mode=620"),
    },
];

const RUNTIME_MOUNTS: &[MountPoint] = &[
    MountPoint {
        source: "tmpfs",
        target: "/tmp",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_NOEXEC),
        data: Some("mode=1777,size=10%"),
    },
    MountPoint {
        source: "tmpfs",
        target: "/run",
        fstype: "tmpfs",
        flags: MsFlags::MS_NOSUID
            .union(MsFlags::MS_NODEV)
            .union(MsFlags::MS_NOEXEC),
        data: Some("mode=0755,size=5%"),
    },
];

/// Mount /proc, /sys and /dev/pts
pub fn mount_pseudo_filesystems() {
    let (proc_mp, rest) = PSEUDO_MOUNTS.split_at(2);
    for mp in proc_mp {
        mount_one(mp);
    }

    // Exact permissions for the /dev entries
    let old_umask = umask(Mode::empty());
    for (dir, mode) in [("/dev/pts", 0o755), ("/dev/shm", 0o1777)] {
        if let Err(e) = mkdir(dir, Mode::from_bits_truncate(mode)) {
            log::warn!("Cannot create {}: {}", dir, e);
        }
    }
    umask(old_umask);

    for mp in rest {
        mount_one(mp);
    }
}

/// Mount /tmp, /run and the user's extra mounts
pub fn mount_runtime_filesystems(extra: &[ExtraMount]) {
    for mp in RUNTIME_MOUNTS {
        mount_one(mp);
    }

    for em in extra {
        // The final path component may not exist yet (e.g. under /sys/fs)
        let _ = fs::create_dir(&em.target);

        let data = (!em.data.is_empty()).then_some(em.data.as_str());
        if let Err(e) = mount(
            Some(em.source.as_str()),
            Path::new(&em.target),
            Some(em.fstype.as_str()),
            em.flags,
            data,
        ) {
            log::warn!("Cannot mount {} at {}: {}", em.source, em.target, e);
        }
    }
}

/// Mount a single filesystem
fn mount_one(mp: &MountPoint) {
    match mount(
        Some(mp.source),
        Path::new(mp.target),
        Some(mp.fstype),
        mp.flags,
        mp.data,
    ) {
        Ok(()) => log::debug!("Mounted {} on {}", mp.fstype, mp.target),
        Err(e) => log::warn!("Cannot mount {}: {}", mp.target, e),
    }
}

/// A user-specified mount (`--mount source:target:fstype:flags:data`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraMount {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub flags: MsFlags,
    pub data: String,
}

impl ExtraMount {
    /// Parse a `;`-separated list; bad entries are skipped with a warning
    pub fn parse_list(spec: &str) -> Vec<ExtraMount> {
        spec.split(';')
            .filter(|s| !s.is_empty())
            .filter_map(|entry| {
                let fields: Vec<&str> = entry.splitn(5, ':').collect();
                if fields.len() != 5 {
                    log::warn!("Invalid parameter to --mount. Expecting 5 colon-separated fields");
                    return None;
                }
                Some(ExtraMount {
                    source: fields[0].to_string(),
                    target: fields[1].to_string(),
                    fstype: fields[2].to_string(),
                    flags: parse_mount_flags(fields[3]),
                    data: fields[4].to_string(),
                })
            })
            .collect()
    }
}

/// Convert mount(8) option names to mount flags
pub fn parse_mount_flags(s: &str) -> MsFlags {
    let mut flags = MsFlags::empty();

    for flag in s.split(',').filter(|f| !f.is_empty()) {
        match flag {
            "dirsync" => flags |= MsFlags::MS_DIRSYNC,
            "mand" => flags |= MsFlags::MS_MANDLOCK,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "nodiratime" => flags |= MsFlags::MS_NODIRATIME,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rw" => flags.remove(MsFlags::MS_RDONLY),
            "relatime" => flags |= MsFlags::MS_RELATIME,
            "silent" => flags |= MsFlags::MS_SILENT,
            "strictatime" => flags |= MsFlags::MS_STRICTATIME,
            "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
            other => log::warn!("Unrecognized filesystem mount flag: {}", other),
        }
    }

    flags
}
