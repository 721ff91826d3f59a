//! Config-file and command-line merging

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beaminit::options::parse_config_file;
use beaminit::pid1::ShutdownAction;
use beaminit::Config;

fn argv(args: &[&str]) -> Vec<String> {
    std::iter::once("/sbin/init")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("beaminit.config");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_config_file_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "# Turn on the debug prints\n\
         -v\n\
         \n\
         --ctty ttyAMA0\n\
         --alternate-exec \"/usr/bin/dtach -N /tmp/iex_prompt\"\n",
    );

    assert_eq!(
        parse_config_file(&path).unwrap(),
        vec![
            "-v",
            "--ctty",
            "ttyAMA0",
            "--alternate-exec",
            "/usr/bin/dtach -N /tmp/iex_prompt",
        ]
    );
}

#[test]
fn test_missing_config_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(parse_config_file(&dir.path().join("none")).unwrap().is_empty());
}

#[test]
fn test_command_line_overrides_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "--hang-on-exit\n--release-path /srv/erlang\n--graceful-shutdown-timeout 5000\n",
    );

    let config = Config::load_from(&path, &argv(&["-H", "-r", "/mnt/release"]));
    assert_eq!(config.unintentional_exit_action, ShutdownAction::Restart);
    assert_eq!(config.release_search_path, vec![PathBuf::from("/mnt/release")]);
    // Untouched by the command line
    assert_eq!(config.graceful_timeout, Duration::from_millis(5000));
}

#[test]
fn test_bad_command_line_falls_back_to_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "--poweroff-on-exit\n-v\n");

    let config = Config::load_from(&path, &argv(&["--uid", "nobody"]));
    assert_eq!(config.unintentional_exit_action, ShutdownAction::PowerOff);
    assert!(config.verbose);
}

#[test]
fn test_bad_config_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "--graceful-shutdown-timeout soon\n");

    let config = Config::load_from(&path, &argv(&[]));
    assert_eq!(config.graceful_timeout, Duration::from_millis(10_000));
    assert_eq!(config.fatal_action, ShutdownAction::Restart);
}

#[test]
fn test_no_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("none"), &argv(&["--hang-on-fatal"]));
    assert_eq!(config.fatal_action, ShutdownAction::Halt);
    assert_eq!(config.unintentional_exit_action, ShutdownAction::Restart);
}

#[test]
fn test_unknown_option_in_config_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "-v\n--ctty ttyAMA0\n--hang-on-exit\n--tty-options 115200n8\n",
    );

    let config = Config::load_from(&path, &argv(&["--uid", "1000", "-z"]));
    assert!(config.verbose);
    assert_eq!(config.ctty.as_deref(), Some("ttyAMA0"));
    assert_eq!(config.unintentional_exit_action, ShutdownAction::Halt);
    assert_eq!(config.uid, Some(1000));
}
