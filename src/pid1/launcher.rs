//! Process launching
//!
//! The runtime is started with `std::process::Command`. Environment and
//! working directory are applied by std. Signal unblocking, resource limits
//! and the uid/gid switch happen in `pre_exec` (after fork, before exec),
//! in that order, so limits are raised while still privileged.
//! A failed exec is reported back to the parent as a spawn error.

use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{SigSet, SigmaskHow};
use nix::unistd::{setgid, setuid, Gid, Uid};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

/// Handle to the supervised runtime process
///
/// Deliberately not `Clone`: the supervision loop is its only owner.
#[derive(Debug, PartialEq, Eq)]
pub struct ChildHandle {
    pid: i32,
}

impl ChildHandle {
    pub fn from_pid(pid: i32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

/// A resource limit applied to the runtime (`--limits`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimit {
    pub resource: Resource,
    pub soft: libc::rlim_t,
    pub hard: libc::rlim_t,
}

/// Everything needed to exec the runtime
#[derive(Debug, Clone, Default)]
pub struct LaunchPlan {
    pub program: PathBuf,
    /// argv[0] when it differs from `program`
    pub arg0: Option<String>,
    pub args: Vec<String>,
    /// Set on top of the environment init inherited from the kernel
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub limits: Vec<ResourceLimit>,
}

impl LaunchPlan {
    fn command(&self, unblock: SigSet) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(arg0) = &self.arg0 {
            cmd.arg0(arg0);
        }
        cmd.args(&self.args);

        // Kernel command-line `key=value` words arrive in init's environment
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let limits = self.limits.clone();
        let uid = self.uid;
        let gid = self.gid;
        unsafe {
            cmd.pre_exec(move || {
                // The runtime must see normal signal delivery
                nix::sys::signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None)?;

                for limit in &limits {
                    if let Err(e) = setrlimit(limit.resource, limit.soft, limit.hard) {
                        log::warn!("Could not set limit {:?}: {}", limit.resource, e);
                    }
                }

                // Limits first: raising a hard limit needs privileges
                if let Some(gid) = gid {
                    setgid(Gid::from_raw(gid))?;
                }
                if let Some(uid) = uid {
                    setuid(Uid::from_raw(uid))?;
                }
                Ok(())
            });
        }

        cmd
    }
}

/// Start the runtime
///
/// `unblock` is the set init keeps blocked; the child re-enables it.
pub fn spawn(plan: &LaunchPlan, unblock: SigSet) -> Result<ChildHandle, LaunchError> {
    if log::log_enabled!(log::Level::Debug) {
        for (key, value) in &plan.env {
            log::debug!("Env: '{}={}'", key, value);
        }
        log::debug!("Exec: '{}'", plan.program.display());
        for arg in &plan.args {
            log::debug!("Arg: '{}'", arg);
        }
    }

    let child = plan
        .command(unblock)
        .spawn()
        .map_err(|e| LaunchError::Spawn {
            program: plan.program.display().to_string(),
            source: e,
        })?;

    // Dropping `Child` neither kills nor waits; init reaps with waitpid
    Ok(ChildHandle::from_pid(child.id() as i32))
}

/// Run a helper command line to completion (`--pre-run-exec`, `--run-on-exit`)
///
/// Like the runtime, the helper gets `unblock` removed from its signal mask.
pub fn run_command(cmdline: &str, unblock: SigSet) -> Result<ExitStatus, LaunchError> {
    log::debug!("run_cmd '{}'", cmdline);
    let parts = shlex::split(cmdline)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| LaunchError::InvalidCommand(cmdline.to_string()))?;

    let mut cmd = Command::new(&parts[0]);
    cmd.args(&parts[1..]);
    unsafe {
        cmd.pre_exec(move || {
            nix::sys::signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None)?;
            Ok(())
        });
    }

    cmd.status().map_err(|e| LaunchError::Spawn {
        program: parts[0].clone(),
        source: e,
    })
}

/// Parse `resource:soft:hard;...`; bad entries are skipped with a warning
pub fn parse_limits(spec: &str) -> Vec<ResourceLimit> {
    spec.split(';')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|entry| {
            let fields: Vec<&str> = entry.split(':').collect();
            if fields.len() != 3 {
                log::warn!("Invalid parameter to --limits. Expecting 3 colon-separated fields");
                return None;
            }
            let Some(resource) = parse_resource(fields[0]) else {
                log::warn!("Unrecognized resource {}", fields[0]);
                return None;
            };
            Some(ResourceLimit {
                resource,
                soft: parse_limit_value(fields[1]),
                hard: parse_limit_value(fields[2]),
            })
        })
        .collect()
}

fn parse_resource(name: &str) -> Option<Resource> {
    Some(match name {
        "as" => Resource::RLIMIT_AS,
        "core" => Resource::RLIMIT_CORE,
        "cpu" => Resource::RLIMIT_CPU,
        "data" => Resource::RLIMIT_DATA,
        "fsize" => Resource::RLIMIT_FSIZE,
        "locks" => Resource::RLIMIT_LOCKS,
        "memlock" => Resource::RLIMIT_MEMLOCK,
        "msgqueue" => Resource::RLIMIT_MSGQUEUE,
        "nice" => Resource::RLIMIT_NICE,
        "nofile" => Resource::RLIMIT_NOFILE,
        "nproc" => Resource::RLIMIT_NPROC,
        "rss" => Resource::RLIMIT_RSS,
        "rtprio" => Resource::RLIMIT_RTPRIO,
        "rttime" => Resource::RLIMIT_RTTIME,
        "sigpending" => Resource::RLIMIT_SIGPENDING,
        "stack" => Resource::RLIMIT_STACK,
        _ => return None,
    })
}

/// Empty or "unlimited" means no limit
fn parse_limit_value(value: &str) -> libc::rlim_t {
    let value = value.trim();
    if value.is_empty() || value == "unlimited" {
        return libc::RLIM_INFINITY;
    }
    value.parse().unwrap_or_else(|_| {
        log::warn!("Invalid limit '{}', using unlimited", value);
        libc::RLIM_INFINITY
    })
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid command line: {0}")]
    InvalidCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid1::reaper::{ProcessTable, WaitResult, ZombieReaper};

    fn sh(script: &str) -> LaunchPlan {
        LaunchPlan {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
            ..Default::default()
        }
    }

    fn exit_status(handle: ChildHandle) -> Option<WaitResult> {
        ZombieReaper::new().wait_for(handle.pid())
    }

    #[test]
    fn test_spawn_reports_exit_code() {
        let handle = spawn(&sh("exit 7"), SigSet::empty()).unwrap();
        assert!(handle.pid() > 0);
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(7)));
    }

    #[test]
    fn test_spawn_sets_environment() {
        let mut plan = sh("test \"$ROOTDIR\" = /srv/erlang && test \"$PATH\" = /usr/bin:/bin");
        plan.env.push(("ROOTDIR".to_string(), "/srv/erlang".to_string()));
        let handle = spawn(&plan, SigSet::empty()).unwrap();
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_keeps_inherited_environment() {
        // Any variable of ours the shell leaves alone will do
        let plain = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || "_/.:-".contains(c))
        };
        let (key, value) = std::env::vars()
            .find(|(k, v)| {
                !matches!(k.as_str(), "PATH" | "PWD" | "OLDPWD" | "SHLVL" | "_" | "IFS")
                    && !k.starts_with(|c: char| c.is_ascii_digit())
                    && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && plain(v)
            })
            .expect("test environment has no plain variable");

        let plan = sh(&format!("test \"${}\" = '{}'", key, value));
        let handle = spawn(&plan, SigSet::empty()).unwrap();
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_applies_limits() {
        // Lowering limits needs no privileges
        let mut plan = sh("test \"$(ulimit -n)\" = 64 && test \"$(ulimit -Hn)\" = 128");
        plan.limits = parse_limits("nofile:64:128");
        let handle = spawn(&plan, SigSet::empty()).unwrap();
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_applies_limits_before_uid_switch() {
        let mut plan = sh("test \"$(ulimit -n)\" = 64 && test \"$(id -u)\" = \"$EXPECTED_UID\"");
        let uid = nix::unistd::getuid().as_raw();
        plan.env.push(("EXPECTED_UID".to_string(), uid.to_string()));
        plan.uid = Some(uid);
        plan.limits = parse_limits("nofile:64:128");
        let handle = spawn(&plan, SigSet::empty()).unwrap();
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_unblocks_gate_signals() {
        use crate::pid1::signals::SignalGate;

        // Blocked in this thread only; the child inherits the thread's mask
        let status = std::thread::spawn(|| {
            let gate = SignalGate::block().unwrap();
            let plan = sh("exec grep -q '^SigBlk:[[:space:]]*0*$' /proc/self/status");
            let handle = spawn(&plan, gate.mask()).unwrap();
            exit_status(handle)
        })
        .join()
        .unwrap();
        assert_eq!(status, Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_child_dies_from_sigterm() {
        use crate::pid1::signals::SignalGate;

        let status = std::thread::spawn(|| {
            let gate = SignalGate::block().unwrap();
            let handle = spawn(&sh("kill -TERM $$; sleep 5"), gate.mask()).unwrap();
            exit_status(handle)
        })
        .join()
        .unwrap();
        assert_eq!(status, Some(WaitResult::Signaled(libc::SIGTERM)));
    }

    #[test]
    fn test_spawn_sets_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = sh("test -f marker");
        std::fs::write(dir.path().join("marker"), "").unwrap();
        plan.working_dir = Some(dir.path().to_path_buf());
        let handle = spawn(&plan, SigSet::empty()).unwrap();
        assert_eq!(exit_status(handle), Some(WaitResult::Exited(0)));
    }

    #[test]
    fn test_spawn_missing_program() {
        let plan = LaunchPlan {
            program: PathBuf::from("/nonexistent/erlexec"),
            ..Default::default()
        };
        let err = spawn(&plan, SigSet::empty()).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn test_run_command() {
        let status = run_command("sh -c 'exit 2'", SigSet::empty()).unwrap();
        assert_eq!(status.code(), Some(2));
    }

    #[test]
    fn test_run_command_rejects_empty() {
        assert!(matches!(
            run_command("   ", SigSet::empty()),
            Err(LaunchError::InvalidCommand(_))
        ));
        assert!(matches!(
            run_command("echo 'oops", SigSet::empty()),
            Err(LaunchError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_parse_limits() {
        let limits = parse_limits("core:unlimited:unlimited;nofile:1024:4096");
        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].resource, Resource::RLIMIT_CORE);
        assert_eq!(limits[0].soft, libc::RLIM_INFINITY);
        assert_eq!(limits[1].resource, Resource::RLIMIT_NOFILE);
        assert_eq!(limits[1].soft, 1024);
        assert_eq!(limits[1].hard, 4096);
    }

    #[test]
    fn test_parse_limits_skips_bad_entries() {
        let limits = parse_limits("bogus:1:2;stack:8192;nproc::");
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].resource, Resource::RLIMIT_NPROC);
        assert_eq!(limits[0].hard, libc::RLIM_INFINITY);
    }
}
