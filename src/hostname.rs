//! Hostname setup
//!
//! Either expanded from `--hostname-pattern` with a per-device unique id,
//! or taken from /etc/hostname.

use std::fs;
use std::process::Command;

const DEFAULT_UNIQUE_ID: &str = "00000000";
const ETC_HOSTNAME: &str = "/etc/hostname";

/// Pick and set the hostname; failures are warnings
pub fn configure(pattern: Option<&str>, uniqueid_exec: Option<&str>) {
    let hostname = match pattern {
        Some(pattern) => {
            let id = uniqueid_exec
                .and_then(unique_id)
                .unwrap_or_else(|| DEFAULT_UNIQUE_ID.to_string());
            from_pattern(pattern, &id)
        }
        None => match fs::read_to_string(ETC_HOSTNAME) {
            Ok(content) => content.lines().next().unwrap_or("").trim().to_string(),
            Err(_) => {
                log::warn!("{} not found", ETC_HOSTNAME);
                return;
            }
        },
    };

    if hostname.is_empty() {
        log::warn!("Not setting empty hostname");
        return;
    }

    log::debug!("Hostname: {}", hostname);
    if let Err(e) = nix::unistd::sethostname(&hostname) {
        log::warn!("Error setting hostname: {}", e);
    }
}

/// Run `cmdline` and take the first word of its output
fn unique_id(cmdline: &str) -> Option<String> {
    let parts = shlex::split(cmdline).filter(|p| !p.is_empty());
    let output = parts.and_then(|parts| Command::new(&parts[0]).args(&parts[1..]).output().ok());

    match output {
        Some(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            Some(first_word(&stdout).to_string())
        }
        _ => {
            log::warn!("`{}` failed. Using default ID: '{}'", cmdline, DEFAULT_UNIQUE_ID);
            None
        }
    }
}

/// Expand `pattern` with `id` and make the result a valid hostname
pub fn from_pattern(pattern: &str, id: &str) -> String {
    let expanded = expand_pattern(pattern, id);
    make_rfc1123_compatible(first_word(&expanded))
}

/// Substitute `%s`, `%.Ns` (first N chars) and `%-.Ns` (last N chars)
///
/// N is one or two digits. Expansion stops at a malformed escape.
pub fn expand_pattern(pattern: &str, id: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + id.len());
    let mut rest = pattern;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        let Some((from_right, width, consumed)) = parse_escape(rest) else {
            return out;
        };
        rest = &rest[consumed..];

        let chars: Vec<char> = id.chars().collect();
        let len = width.map_or(chars.len(), |w| w.min(chars.len()));
        let start = if from_right { chars.len() - len } else { 0 };
        out.extend(&chars[start..start + len]);
    }

    out.push_str(rest);
    out
}

/// Returns (take from right, width, bytes consumed) for the text after '%'
fn parse_escape(s: &str) -> Option<(bool, Option<usize>, usize)> {
    if s.starts_with('s') {
        return Some((false, None, 1));
    }

    let (from_right, body) = match s.strip_prefix("-.") {
        Some(body) => (true, body),
        None => (false, s.strip_prefix('.')?),
    };
    let prefix = s.len() - body.len();

    let digits = body.bytes().take(2).take_while(u8::is_ascii_digit).count();
    if digits == 0 || body.as_bytes().get(digits) != Some(&b's') {
        return None;
    }
    let width = body[..digits].parse().ok()?;
    Some((from_right, Some(width), prefix + digits + 1))
}

/// Trimmed, and cut at the first interior whitespace
fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

/// Keep `a-z0-9-.`, lowercasing capitals and dropping everything else
fn make_rfc1123_compatible(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '.' => Some(c),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}
