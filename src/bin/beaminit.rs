//! beaminit - PID 1 supervisor for a BEAM runtime
//!
//! Boot sequence:
//! - Mounts essential filesystems and sets up the console
//! - Blocks supervision signals before anything is spawned
//! - Finds the release and launches the runtime
//! - Supervises it, then tears the system down and reboots/halts/powers off

use std::path::Path;
use std::process;

use beaminit::pid1::{self, SignalGate, Supervisor, ZombieReaper};
use beaminit::{console, hostname, logging, release, Config};

fn main() {
    if let Err(e) = logging::init() {
        eprintln!("beaminit: failed to initialize logging: {}", e);
    }

    if !pid1::is_pid1() {
        log::error!("beaminit must be run as PID 1 (pid={})", process::id());
        process::exit(1);
    }

    pid1::mount_pseudo_filesystems();

    let config = Config::load();
    logging::set_verbose(config.verbose);

    if config.print_timing {
        log::warn!("start");
    }

    console::set_ctty(config.ctty.as_deref());
    pid1::mount_runtime_filesystems(&config.extra_mounts);
    hostname::configure(
        config.hostname_pattern.as_deref(),
        config.uniqueid_exec.as_deref(),
    );

    // Before the runtime exists, so no request can slip through
    let gate = match SignalGate::block() {
        Ok(gate) => gate,
        Err(e) => pid1::fatal(config.fatal_action, &e.to_string()),
    };
    let mask = gate.mask();

    let plan = match release::launch_plan(&config, Path::new(release::ERLANG_ROOT_DIR)) {
        Ok(plan) => plan,
        Err(e) => pid1::fatal(config.fatal_action, &e.to_string()),
    };

    if let Some(cmd) = &config.pre_run_exec {
        if let Err(e) = pid1::run_command(cmd, mask) {
            log::warn!("{}", e);
        }
    }

    log::debug!("Launching erl...");
    if config.print_timing {
        log::warn!("stop");
    }

    let supervisor_config = config.supervisor();
    let mut supervisor = Supervisor::new(&supervisor_config, gate, ZombieReaper::new());
    let outcome = match supervisor.run(|| pid1::spawn(&plan, mask)) {
        Ok(outcome) => outcome,
        Err(e) => pid1::fatal(config.fatal_action, &e.to_string()),
    };

    if !outcome.intentional {
        if let Some(cmd) = &config.run_on_exit {
            if let Err(e) = pid1::run_command(cmd, mask) {
                log::warn!("{}", e);
            }
        }
    }

    pid1::finish(&outcome, &config.teardown())
}
