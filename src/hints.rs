//! Pattern-based remediation hints for failed tasks.
//!
//! Maps a failure's exit code and the tail of its output to at most
//! three suggested remediations. Exit code 1 is too generic to say
//! anything useful on its own; the output patterns still apply.

/// Maximum hints attached to one failure.
pub const MAX_HINTS: usize = 3;

/// Hint derived from the exit code alone.
fn exit_code_hint(code: i32) -> Option<&'static str> {
    match code {
        126 => Some("the command exists but is not executable; check its permission bits (chmod +x)"),
        127 => Some("command not found; check the spelling, or that PATH inside the task includes it"),
        137 => Some("the process was killed (SIGKILL); likely memory pressure, try raising the limit or reducing parallelism"),
        143 => Some("the process received SIGTERM; something outside the task terminated it"),
        _ => None,
    }
}

/// Output-pattern matchers, checked in order against the lowercased tail.
const PATTERN_HINTS: &[(&str, &str)] = &[
    (
        "cannot find module",
        "a node dependency is missing; run `npm install` (or `npm ci`) before this task",
    ),
    (
        "modulenotfounderror",
        "a python dependency is missing; run `pip install -r requirements.txt` before this task",
    ),
    (
        "no module named",
        "a python dependency is missing; run `pip install -r requirements.txt` before this task",
    ),
    (
        "connection refused",
        "a network dependency is not reachable; if the task needs a database or cache, declare it under `services`",
    ),
    (
        "address already in use",
        "the port is taken; another task or a leftover process is bound to it",
    ),
    (
        "eaddrinuse",
        "the port is taken; another task or a leftover process is bound to it",
    ),
    (
        "permission denied",
        "a file or socket is not accessible; check ownership and mode bits in the task workdir",
    ),
    (
        "no space left on device",
        "the disk is full; clean the cache (`sykli cache clean`) or free space on the runner",
    ),
    (
        "command not found",
        "a program the command needs is not installed in this environment; add it to the container image",
    ),
    (
        "could not find `cargo.toml`",
        "cargo ran outside the crate; set the task `workdir` to the directory containing Cargo.toml",
    ),
    (
        "unable to locate package",
        "the apt package index is stale; run `apt-get update` before installing",
    ),
    (
        "not a git repository",
        "the task expects a git checkout; mount the source directory or run after checkout",
    ),
    (
        "no such file or directory",
        "a path the command uses does not exist; check the task `workdir` and declared inputs",
    ),
];

/// Returns up to [`MAX_HINTS`] remediation hints for a failure.
///
/// The exit-code hint (when the code is specific enough) comes first,
/// then output-pattern hints in match order, deduplicated.
pub fn hints_for(exit_code: Option<i32>, output_tail: &str) -> Vec<&'static str> {
    let mut hints = Vec::new();

    if let Some(code) = exit_code
        && let Some(hint) = exit_code_hint(code)
    {
        hints.push(hint);
    }

    let tail = output_tail.to_lowercase();
    for &(pattern, hint) in PATTERN_HINTS {
        if hints.len() >= MAX_HINTS {
            break;
        }
        if tail.contains(pattern) && !hints.contains(&hint) {
            hints.push(hint);
        }
    }

    hints
}
