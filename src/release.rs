//! Release discovery and launch plan
//!
//! Finds the ERTS installation and the OTP release to boot, then turns
//! them plus the options into the exact program, arguments and environment
//! the runtime is started with.
//!
//! Layout searched for each release path entry `<base>`:
//! - `<base>/releases/<version>/`
//! - `<base>/<name>/releases/<version>/`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::options::Config;
use crate::pid1::LaunchPlan;

/// Where the Erlang runtime system is installed
pub const ERLANG_ROOT_DIR: &str = "/usr/lib/erlang";

/// A release found on the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Directory containing `releases`
    pub root: PathBuf,
    /// `releases/<version>`
    pub info_dir: PathBuf,
    pub sys_config: Option<PathBuf>,
    pub vm_args: Option<PathBuf>,
    /// Boot script without its `.boot` extension
    pub boot: PathBuf,
}

/// Locate the single `erts-*` directory under `erlang_root`
pub fn find_erts_dir(erlang_root: &Path) -> Result<PathBuf, ReleaseError> {
    log::debug!("find_erts_directory");
    let entries = sorted_entries(erlang_root).map_err(|e| ReleaseError::NoInstallation {
        root: erlang_root.to_path_buf(),
        source: e,
    })?;

    let mut erts: Vec<PathBuf> = entries
        .into_iter()
        .filter(|p| file_name(p).starts_with("erts-"))
        .collect();

    match erts.len() {
        0 => Err(ReleaseError::NoErts(erlang_root.to_path_buf())),
        1 => Ok(erts.remove(0)),
        _ => Err(ReleaseError::MultipleErts),
    }
}

/// First release found on `search_path`
///
/// `Ok(None)` when no path holds a release; a release without a boot
/// script is an error.
pub fn find_release(search_path: &[PathBuf], boot: Option<&str>) -> Result<Option<Release>, ReleaseError> {
    log::debug!("find_release");

    for base in search_path {
        if let Some((root, info_dir)) = find_release_dirs(base, 1) {
            log::debug!("Using release in {}.", info_dir.display());

            let sys_config = existing(info_dir.join("sys.config"));
            let vm_args = existing(info_dir.join("vm.args"));
            let boot = find_boot_path(&info_dir, boot)?;

            return Ok(Some(Release {
                root,
                info_dir,
                sys_config,
                vm_args,
                boot,
            }));
        }

        log::warn!("No release found in {}.", base.display());
    }

    Ok(None)
}

/// Search `base` (and `depth` levels below) for a `releases` directory
fn find_release_dirs(base: &Path, depth: usize) -> Option<(PathBuf, PathBuf)> {
    for dir in sorted_entries(base).ok()?.into_iter().filter(|p| p.is_dir()) {
        if file_name(&dir) == "releases" {
            if let Some(info_dir) = first_subdir(&dir) {
                return Some((base.to_path_buf(), info_dir));
            }
        }

        if depth > 0 {
            if let Some(found) = find_release_dirs(&dir, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

fn first_subdir(dir: &Path) -> Option<PathBuf> {
    sorted_entries(dir).ok()?.into_iter().find(|p| p.is_dir())
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        log::warn!("{} not found?", path.display());
        None
    }
}

/// The boot script to pass to `-boot`, minus `.boot`
fn find_boot_path(info_dir: &Path, requested: Option<&str>) -> Result<PathBuf, ReleaseError> {
    log::debug!("find_boot_path");

    if let Some(requested) = requested {
        // Absolute or relative to the release version directory
        let path = info_dir.join(requested);
        let with_ext = PathBuf::from(format!("{}.boot", path.display()));
        if path.exists() || with_ext.exists() {
            return Ok(strip_boot_ext(path));
        }
        log::warn!("Specified boot file '{}' not found. Auto-detecting.", requested);
    }

    let entries = sorted_entries(info_dir).unwrap_or_default();
    let mut boot_files = entries
        .into_iter()
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "boot"));

    let first = boot_files
        .next()
        .ok_or_else(|| ReleaseError::NoBootFile(info_dir.to_path_buf()))?;
    if boot_files.next().is_some() {
        log::warn!("Found more than one boot file. Using {}.", file_name(&first));
    }

    Ok(strip_boot_ext(first))
}

fn strip_boot_ext(path: PathBuf) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "boot") {
        path.with_extension("")
    } else {
        path
    }
}

/// Directory entries sorted by name
fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build the runtime's launch plan from the installation under `erlang_root`
pub fn launch_plan(config: &Config, erlang_root: &Path) -> Result<LaunchPlan, ReleaseError> {
    let erts_dir = find_erts_dir(erlang_root)?;
    let release = find_release(&config.release_search_path, config.boot.as_deref())?;
    let root = release
        .as_ref()
        .map_or_else(|| erlang_root.to_path_buf(), |r| r.root.clone());

    let erlexec = erts_dir.join("bin").join("erlexec");

    let mut env = vec![
        ("HOME".to_string(), "/root".to_string()),
        ("PATH".to_string(), "/usr/sbin:/usr/bin:/sbin:/bin".to_string()),
        ("TERM".to_string(), "vt100".to_string()),
        ("ROOTDIR".to_string(), root.display().to_string()),
        ("BINDIR".to_string(), erts_dir.join("bin").display().to_string()),
        ("EMU".to_string(), "beam".to_string()),
        ("PROGNAME".to_string(), "erl".to_string()),
    ];
    env.extend(config.env.iter().cloned());

    let alternate: Vec<String> = config
        .alternate_exec
        .as_deref()
        .and_then(shlex::split)
        .unwrap_or_default();

    let (program, arg0, mut args) = match alternate.split_first() {
        Some((wrapper, wrapper_args)) => {
            let mut args = wrapper_args.to_vec();
            args.push(erlexec.display().to_string());
            (PathBuf::from(wrapper), None, args)
        }
        None => (erlexec, Some("erlexec".to_string()), Vec::new()),
    };

    if let Some(release) = &release {
        if let Some(sys_config) = &release.sys_config {
            args.push("-config".to_string());
            args.push(sys_config.display().to_string());
        }
        args.push("-boot".to_string());
        args.push(release.boot.display().to_string());
        if let Some(vm_args) = &release.vm_args {
            args.push("-args_file".to_string());
            args.push(vm_args.display().to_string());
        }
    }

    let erts_lib_dir = erlang_root.join("lib");
    if erts_lib_dir.is_dir() {
        args.push("-boot_var".to_string());
        args.push("ERTS_LIB_DIR".to_string());
        args.push(erts_lib_dir.display().to_string());
    }

    Ok(LaunchPlan {
        program,
        arg0,
        args,
        env,
        working_dir: Some(config.working_directory.clone().unwrap_or(root)),
        uid: config.uid,
        gid: config.gid,
        limits: config.limits.clone(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("Erlang installation not found. Check that {} exists: {source}", .root.display())]
    NoInstallation {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("erts not found. Check that erlang was installed to {}", .0.display())]
    NoErts(PathBuf),

    #[error("Found multiple erts directories. Clean up the installation.")]
    MultipleErts,

    #[error("No boot file found in {}.", .0.display())]
    NoBootFile(PathBuf),
}
