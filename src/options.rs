//! Command-line and config-file options
//!
//! Arguments come from `/etc/beaminit.config` followed by the kernel
//! command line, so the command line wins. A bad argument never stops the
//! boot: unknown options are dropped with a warning, and if what remains
//! still fails to parse the next best set of arguments is used.

use clap::{CommandFactory, Parser};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pid1::{
    parse_limits, ExtraMount, ResourceLimit, ShutdownAction, SupervisorConfig, TeardownConfig,
    DEFAULT_GRACEFUL_TIMEOUT, DEFAULT_REBOOT_PARAM_PATH,
};

/// Config file merged in front of the command line
pub const CONFIG_PATH: &str = "/etc/beaminit.config";

/// Default release search path
pub const DEFAULT_RELEASE_PATH: &str = "/srv/erlang";

#[derive(Parser, Debug, Default)]
#[command(
    name = "beaminit",
    about = "PID 1 supervisor for a BEAM runtime",
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
struct Args {
    /// Force the controlling terminal (e.g. ttyS0)
    #[arg(short = 'c', long)]
    ctty: Option<String>,

    /// Program whose output is the unique id for the hostname
    #[arg(short = 'd', long)]
    uniqueid_exec: Option<String>,

    /// Extra environment for the runtime (FOO=bar;FOO2=bar2)
    #[arg(short = 'e', long)]
    env: Option<String>,

    /// Halt when the runtime exits on its own
    #[arg(short = 'h', long, overrides_with_all = ["reboot_on_exit", "poweroff_on_exit"])]
    hang_on_exit: bool,

    /// Reboot when the runtime exits on its own (default)
    #[arg(short = 'H', long, overrides_with_all = ["hang_on_exit", "poweroff_on_exit"])]
    reboot_on_exit: bool,

    /// Power off when the runtime exits on its own
    #[arg(long, overrides_with_all = ["hang_on_exit", "reboot_on_exit"])]
    poweroff_on_exit: bool,

    /// Halt on a fatal boot error
    #[arg(long, overrides_with_all = ["reboot_on_fatal", "poweroff_on_fatal"])]
    hang_on_fatal: bool,

    /// Reboot on a fatal boot error (default)
    #[arg(long, overrides_with_all = ["hang_on_fatal", "poweroff_on_fatal"])]
    reboot_on_fatal: bool,

    /// Power off on a fatal boot error
    #[arg(long, overrides_with_all = ["hang_on_fatal", "reboot_on_fatal"])]
    poweroff_on_fatal: bool,

    /// Extra mounts (source:target:fstype:flags:data;...)
    #[arg(short = 'm', long)]
    mount: Option<String>,

    /// Hostname pattern, e.g. nerves-%.4s
    #[arg(short = 'n', long)]
    hostname_pattern: Option<String>,

    /// Colon-separated release search path
    #[arg(short = 'r', long)]
    release_path: Option<String>,

    /// Wrapper command run in front of the runtime
    #[arg(short = 's', long)]
    alternate_exec: Option<String>,

    /// Boot script to use instead of the release's
    #[arg(long)]
    boot: Option<String>,

    /// Log start and stop timestamps
    #[arg(short = 't', long)]
    print_timing: bool,

    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(long)]
    uid: Option<u32>,

    #[arg(long)]
    gid: Option<u32>,

    #[arg(long)]
    working_directory: Option<PathBuf>,

    /// Command to run before the runtime starts
    #[arg(long)]
    pre_run_exec: Option<String>,

    /// Command to run after the runtime exits unexpectedly
    #[arg(long)]
    run_on_exit: Option<String>,

    /// Resource limits (resource:soft:hard;...)
    #[arg(long)]
    limits: Option<String>,

    /// Milliseconds the runtime gets to stop after a shutdown request
    #[arg(long)]
    graceful_shutdown_timeout: Option<u64>,

    #[arg(long)]
    shutdown_report: Option<PathBuf>,

    #[arg(long)]
    reboot_param_path: Option<PathBuf>,

    /// Stray words the kernel passes on to init
    #[arg(hide = true)]
    extra: Vec<String>,
}

/// Parsed options, fixed for the life of init
#[derive(Debug, Clone)]
pub struct Config {
    pub ctty: Option<String>,
    pub uniqueid_exec: Option<String>,
    pub env: Vec<(String, String)>,
    pub unintentional_exit_action: ShutdownAction,
    pub fatal_action: ShutdownAction,
    pub extra_mounts: Vec<ExtraMount>,
    pub hostname_pattern: Option<String>,
    pub release_search_path: Vec<PathBuf>,
    pub alternate_exec: Option<String>,
    pub boot: Option<String>,
    pub print_timing: bool,
    pub verbose: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub working_directory: Option<PathBuf>,
    pub pre_run_exec: Option<String>,
    pub run_on_exit: Option<String>,
    pub limits: Vec<ResourceLimit>,
    pub graceful_timeout: Duration,
    pub shutdown_report: Option<PathBuf>,
    pub reboot_param_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::from(Args::default())
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        if !args.extra.is_empty() {
            log::warn!("Ignoring extra arguments: {}", args.extra.join(" "));
        }

        let unintentional_exit_action = if args.hang_on_exit {
            ShutdownAction::Halt
        } else if args.poweroff_on_exit {
            ShutdownAction::PowerOff
        } else {
            ShutdownAction::Restart
        };

        let fatal_action = if args.hang_on_fatal {
            ShutdownAction::Halt
        } else if args.poweroff_on_fatal {
            ShutdownAction::PowerOff
        } else {
            ShutdownAction::Restart
        };

        let release_search_path = args
            .release_path
            .as_deref()
            .unwrap_or(DEFAULT_RELEASE_PATH)
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        Self {
            ctty: args.ctty,
            uniqueid_exec: args.uniqueid_exec,
            env: args.env.as_deref().map(parse_env).unwrap_or_default(),
            unintentional_exit_action,
            fatal_action,
            extra_mounts: args
                .mount
                .as_deref()
                .map(ExtraMount::parse_list)
                .unwrap_or_default(),
            hostname_pattern: args.hostname_pattern,
            release_search_path,
            alternate_exec: args.alternate_exec,
            boot: args.boot,
            print_timing: args.print_timing,
            verbose: args.verbose,
            uid: args.uid,
            gid: args.gid,
            working_directory: args.working_directory,
            pre_run_exec: args.pre_run_exec,
            run_on_exit: args.run_on_exit,
            limits: args.limits.as_deref().map(parse_limits).unwrap_or_default(),
            graceful_timeout: args
                .graceful_shutdown_timeout
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_GRACEFUL_TIMEOUT),
            shutdown_report: args.shutdown_report,
            reboot_param_path: args
                .reboot_param_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REBOOT_PARAM_PATH)),
        }
    }
}

impl Config {
    /// Options from `/etc/beaminit.config` and the process arguments
    pub fn load() -> Self {
        let argv = lossy_args(std::env::args_os());
        Self::load_from(Path::new(CONFIG_PATH), &argv)
    }

    /// Options from `config_path` merged with `argv` (program name first)
    pub fn load_from(config_path: &Path, argv: &[String]) -> Self {
        let file_args = match parse_config_file(config_path) {
            Ok(args) => args,
            Err(e) => {
                log::warn!("Cannot read {}: {}", config_path.display(), e);
                Vec::new()
            }
        };

        let program = argv.first().map(String::as_str).unwrap_or("beaminit");
        let merged = drop_unknown_options(merge_args(
            program,
            &file_args,
            argv.get(1..).unwrap_or_default(),
        ));

        match Self::parse(&merged) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring command line: {}", e);
                let file_only = drop_unknown_options(merge_args(program, &file_args, &[]));
                Self::parse(&file_only).unwrap_or_else(|e| {
                    log::warn!("Ignoring {}: {}", config_path.display(), e);
                    Self::default()
                })
            }
        }
    }

    /// Parse a full argument vector (program name first)
    pub fn parse(args: &[String]) -> Result<Self, OptionsError> {
        let args = Args::try_parse_from(args)?;
        Ok(Self::from(args))
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            graceful_timeout: self.graceful_timeout,
            unintentional_exit_action: self.unintentional_exit_action,
            reboot_param_path: self.reboot_param_path.clone(),
        }
    }

    pub fn teardown(&self) -> TeardownConfig {
        TeardownConfig {
            report_path: self.shutdown_report.clone(),
            ..TeardownConfig::default()
        }
    }
}

/// Arguments as UTF-8; `env::args()` would panic, and so would the kernel
fn lossy_args(args: impl IntoIterator<Item = OsString>) -> Vec<String> {
    args.into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

/// Program name, then config-file arguments, then command-line arguments
pub fn merge_args(program: &str, file_args: &[String], cmdline: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(1 + file_args.len() + cmdline.len());
    merged.push(program.to_string());
    merged.extend_from_slice(file_args);
    merged.extend_from_slice(cmdline);
    merged
}

/// Remove options `Args` does not know, warning about each one
///
/// Values of known options are passed through untouched, so a value that
/// happens to start with `-` is not mistaken for an option.
pub fn drop_unknown_options(args: Vec<String>) -> Vec<String> {
    let command = Args::command();
    let mut longs = HashMap::new();
    let mut shorts = HashMap::new();
    for arg in command.get_arguments() {
        let takes_value = arg.get_action().takes_values();
        if let Some(long) = arg.get_long() {
            longs.insert(long.to_string(), takes_value);
        }
        if let Some(short) = arg.get_short() {
            shorts.insert(short, takes_value);
        }
    }

    let mut kept = Vec::with_capacity(args.len());
    let mut args = args.into_iter();
    if let Some(program) = args.next() {
        kept.push(program);
    }

    while let Some(arg) = args.next() {
        if arg == "--" {
            kept.push(arg);
            kept.extend(args.by_ref());
            break;
        }

        if let Some(body) = arg.strip_prefix("--") {
            let (name, inline) = match body.split_once('=') {
                Some((name, _)) => (name, true),
                None => (body, false),
            };
            match longs.get(name) {
                Some(&takes_value) => {
                    kept.push(arg.clone());
                    if takes_value && !inline {
                        kept.extend(args.next());
                    }
                }
                None => log::warn!("Ignoring unknown option '--{}'", name),
            }
        } else if let Some(body) = arg.strip_prefix('-').filter(|b| !b.is_empty()) {
            // Short options may be clustered (-vt) or carry a value (-cttyS0)
            let mut cluster = String::from("-");
            let mut needs_value = false;
            for (i, c) in body.char_indices() {
                match shorts.get(&c) {
                    Some(&true) => {
                        cluster.push(c);
                        let rest = &body[i + c.len_utf8()..];
                        if rest.is_empty() {
                            needs_value = true;
                        } else {
                            cluster.push_str(rest);
                        }
                        break;
                    }
                    Some(&false) => cluster.push(c),
                    None => log::warn!("Ignoring unknown option '-{}'", c),
                }
            }
            if cluster.len() > 1 {
                kept.push(cluster);
                if needs_value {
                    kept.extend(args.next());
                }
            }
        } else {
            kept.push(arg);
        }
    }

    kept
}

/// Split a config file into arguments; a missing file has none
///
/// Lines are split like a shell would. `#` starts a comment.
pub fn parse_config_file(path: &Path) -> io::Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut args = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match shlex::split(line) {
            Some(words) => args.extend(words),
            None => log::warn!(
                "{}:{}: unbalanced quotes, ignoring line",
                path.display(),
                lineno + 1
            ),
        }
    }

    Ok(args)
}

/// Parse `FOO=bar;FOO2=bar2`
fn parse_env(spec: &str) -> Vec<(String, String)> {
    spec.split(';')
        .filter(|s| !s.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                log::warn!("Ignoring invalid environment entry '{}'", entry);
                None
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("{0}")]
    Invalid(#[from] clap::Error),
}
