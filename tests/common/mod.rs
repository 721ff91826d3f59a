//! Scripted stand-ins for the signal gate, process table and kernel

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beaminit::pid1::{
    EventSource, ExitOutcome, GateEvent, Kernel, MountEntry, ProcessTable, ReapedProcess,
    ShutdownAction, SignalError, Unmounter, WaitResult,
};
use nix::errno::Errno;
use nix::sys::signal::Signal;

pub const RUNTIME_PID: i32 = 100;

/// Replays a fixed list of events and records every timeout it was given
#[derive(Default)]
pub struct ScriptedEvents {
    pub events: VecDeque<GateEvent>,
    pub timeouts: Vec<Option<Duration>>,
}

impl ScriptedEvents {
    pub fn new(events: impl IntoIterator<Item = GateEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            timeouts: Vec::new(),
        }
    }
}

impl EventSource for ScriptedEvents {
    fn wait_next(&mut self, timeout: Option<Duration>) -> Result<GateEvent, SignalError> {
        self.timeouts.push(timeout);
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => panic!("event script exhausted"),
        }
    }
}

/// Hands out one batch of reaped processes per `reap_all` call
#[derive(Default)]
pub struct FakeProcesses {
    pub batches: VecDeque<Vec<ReapedProcess>>,
    /// What a blocking wait returns after a kill
    pub wait_result: Option<WaitResult>,
    pub kills: Vec<i32>,
    pub waits: Vec<i32>,
}

impl FakeProcesses {
    pub fn new(batches: impl IntoIterator<Item = Vec<(i32, WaitResult)>>) -> Self {
        Self {
            batches: batches
                .into_iter()
                .map(|batch| {
                    batch
                        .into_iter()
                        .map(|(pid, status)| ReapedProcess { pid, status })
                        .collect()
                })
                .collect(),
            ..Self::default()
        }
    }
}

impl ProcessTable for FakeProcesses {
    fn reap_all(&mut self) -> Vec<ReapedProcess> {
        self.batches.pop_front().unwrap_or_default()
    }

    fn wait_for(&mut self, pid: i32) -> Option<WaitResult> {
        self.waits.push(pid);
        self.wait_result
    }

    fn force_kill(&mut self, pid: i32) -> Result<(), Errno> {
        self.kills.push(pid);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Sync,
    DisableCoreDumps,
    KillAll(Signal),
    Pause(Duration),
    MountTable,
    WriteReport(PathBuf),
    Unmount(String),
    Reboot(ShutdownAction, Option<String>),
}

/// Records teardown steps instead of performing them
#[derive(Default)]
pub struct RecordingKernel {
    pub steps: Vec<Step>,
    pub mounts: Vec<MountEntry>,
    /// Paths whose unmount fails with EBUSY
    pub busy: HashSet<String>,
}

impl RecordingKernel {
    pub fn with_mounts(mounts: &[(&str, &str)]) -> Self {
        Self {
            mounts: mounts
                .iter()
                .map(|(source, target)| MountEntry::new(*source, *target))
                .collect(),
            ..Self::default()
        }
    }
}

impl Unmounter for RecordingKernel {
    fn unmount(&mut self, path: &str) -> Result<(), Errno> {
        self.steps.push(Step::Unmount(path.to_string()));
        if self.busy.contains(path) {
            Err(Errno::EBUSY)
        } else {
            Ok(())
        }
    }
}

impl Kernel for RecordingKernel {
    fn sync(&mut self) {
        self.steps.push(Step::Sync);
    }

    fn disable_core_dumps(&mut self) -> io::Result<()> {
        self.steps.push(Step::DisableCoreDumps);
        Ok(())
    }

    fn kill_all(&mut self, signal: Signal) -> Result<(), Errno> {
        self.steps.push(Step::KillAll(signal));
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.steps.push(Step::Pause(duration));
    }

    fn mount_table(&mut self) -> io::Result<Vec<MountEntry>> {
        self.steps.push(Step::MountTable);
        Ok(self.mounts.clone())
    }

    fn write_report(&mut self, path: &Path, _outcome: &ExitOutcome) -> io::Result<()> {
        self.steps.push(Step::WriteReport(path.to_path_buf()));
        Ok(())
    }

    fn reboot(&mut self, action: ShutdownAction, args: Option<&str>) -> Errno {
        self.steps
            .push(Step::Reboot(action, args.map(str::to_string)));
        Errno::EPERM
    }
}
