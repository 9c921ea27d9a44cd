//! Gate approval strategies.
//!
//! A gate is an approval checkpoint attached to a task; the task does not
//! run until the gate resolves. Strategies:
//!
//! - `prompt`: ask an interactive TTY; denied when stdin is not a TTY.
//! - `env`: poll the named environment variable once per second until the
//!   deadline; `approved`, `1`, `true` and `yes` approve, `denied` denies,
//!   any other non-empty value denies.
//! - `file`: poll for the file; first existence approves unless the
//!   content is literally `denied`; absent until the deadline times out.
//! - `webhook`: declared but unimplemented; always denied.

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::graph::{Gate, GateStrategy};

/// How a gate resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The gate approved; the task may run.
    Approved,
    /// The gate denied; the task fails with `GateDenied`.
    Denied,
    /// The gate did not resolve before its deadline.
    TimedOut,
}

/// Poll interval for `env` and `file` strategies.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Acquires approval for `task` according to the gate's strategy,
/// blocking up to `gate.timeout_s` seconds.
pub fn acquire(task: &str, gate: &Gate) -> GateOutcome {
    match gate.strategy {
        GateStrategy::Prompt => prompt(task, gate),
        GateStrategy::Env => poll_env(task, gate),
        GateStrategy::File => poll_file(task, gate),
        GateStrategy::Webhook => {
            warn!(task, "webhook gate strategy is not implemented; denying");
            GateOutcome::Denied
        }
    }
}

fn prompt(task: &str, gate: &Gate) -> GateOutcome {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        warn!(task, "prompt gate in a non-interactive environment; denying");
        return GateOutcome::Denied;
    }

    let message = if gate.message.is_empty() {
        format!("approve task {:?}?", task)
    } else {
        gate.message.clone()
    };
    print!("{} [y/N] ", message);
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(_) => match line.trim().to_lowercase().as_str() {
            "y" | "yes" => GateOutcome::Approved,
            _ => GateOutcome::Denied,
        },
        Err(_) => GateOutcome::Denied,
    }
}

fn poll_env(task: &str, gate: &Gate) -> GateOutcome {
    let Some(var) = gate.env_var.as_deref() else {
        warn!(task, "env gate without env_var; denying");
        return GateOutcome::Denied;
    };

    let deadline = Instant::now() + Duration::from_secs(gate.timeout_s);
    loop {
        if let Ok(value) = std::env::var(var) {
            match value.to_lowercase().as_str() {
                "approved" | "1" | "true" | "yes" => return GateOutcome::Approved,
                "denied" => return GateOutcome::Denied,
                "" => {}
                _ => return GateOutcome::Denied,
            }
        }
        if Instant::now() >= deadline {
            return GateOutcome::TimedOut;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn poll_file(task: &str, gate: &Gate) -> GateOutcome {
    let Some(path) = gate.file_path.as_deref() else {
        warn!(task, "file gate without file_path; denying");
        return GateOutcome::Denied;
    };

    let deadline = Instant::now() + Duration::from_secs(gate.timeout_s);
    loop {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            if content.trim() == "denied" {
                return GateOutcome::Denied;
            }
            return GateOutcome::Approved;
        }
        if Instant::now() >= deadline {
            return GateOutcome::TimedOut;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}
