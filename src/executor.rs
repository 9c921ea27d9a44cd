//! Command execution with live output streaming.
//!
//! Tasks run as child processes with stdout and stderr piped. Both
//! streams are merged: each reader pushes complete lines through a shared
//! sink that prints them dim with a `[task]` prefix and retains a tail of
//! at most [`TAIL_BUFFER_SIZE`] bytes for error reporting, plus a line
//! counter for the success summary.
//!
//! A task's deadline is enforced here: the parent polls the child and
//! kills it when the deadline expires, reporting the timeout in the
//! execution result rather than leaving a half-dead process behind.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use camino::Utf8PathBuf;

/// Maximum size of the retained output tail in bytes (4 KiB).
///
/// Large enough to hold the error lines at the end of a failing command,
/// small enough that a thousand concurrent tasks stay cheap.
pub const TAIL_BUFFER_SIZE: usize = 4 * 1024;

/// How often the parent polls a running child for exit or deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded suffix of the command's output, trimmed at line boundaries.
///
/// Output accumulates in one contiguous buffer. Whenever the bound is
/// exceeded, the front is cut at the first line break past the overflow,
/// so the retained tail holds the most recent output (the error messages
/// at the end of a failing command) and begins with a complete line. The
/// only exception is a single line larger than the whole bound, which is
/// kept as its trailing bytes.
struct TailBuffer {
    bytes: Vec<u8>,
    max_size: usize,
}

impl TailBuffer {
    fn new(max_size: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_size,
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        self.bytes.extend_from_slice(line);
        if self.bytes.len() <= self.max_size {
            return;
        }
        let overflow = self.bytes.len() - self.max_size;
        // Cut past the overflow at a line break, excluding the terminal
        // newline so an oversized single line keeps its suffix.
        let search_end = self.bytes.len().saturating_sub(1);
        let cut = self.bytes[overflow..search_end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|nl| overflow + nl + 1)
            .unwrap_or(overflow);
        self.bytes.drain(..cut);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

/// Shared sink both reader threads feed: the tail buffer plus the line
/// counter for the summary.
struct OutputSink {
    tail: TailBuffer,
    lines: u64,
    prefix: String,
    quiet: bool,
}

impl OutputSink {
    fn consume(&mut self, line: &[u8]) {
        self.lines += 1;
        if !self.quiet {
            let text = String::from_utf8_lossy(line);
            let trimmed = text.trim_end_matches(['\n', '\r']);
            // Dim styling keeps task output visually secondary to the
            // engine's own status lines.
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "\x1b[2m[{}]\x1b[0m {}", self.prefix, trimmed);
        }
        self.tail.push_line(line);
    }
}

/// Reads one pipe to EOF, feeding complete lines into the shared sink.
fn read_pipe<R: Read>(pipe: Option<R>, sink: &Arc<Mutex<OutputSink>>) {
    let Some(pipe) = pipe else { return };
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if let Ok(mut sink) = sink.lock() {
                    sink.consume(&line);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "I/O error reading task output, stopping");
                break;
            }
        }
    }
}

/// Specification for one command execution.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory, when different from the parent's.
    pub cwd: Option<Utf8PathBuf>,
    /// Environment variables set in addition to the inherited ones.
    pub env: Vec<(String, String)>,
    /// Display prefix on streamed output lines (the task name).
    pub prefix: String,
    /// Hard deadline; the child is killed when it expires.
    pub deadline: Option<Duration>,
}

impl CommandSpec {
    /// Creates a spec for `program` with the given arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            prefix: String::new(),
            deadline: None,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: Utf8PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Adds environment variables.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the display prefix for streamed output.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the hard deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Human-readable command line for logs and error blocks.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Result of one command execution.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status; `None` in dry-run mode or after a kill on timeout
    /// where the platform reports no status.
    pub status: Option<ExitStatus>,
    /// True when the deadline expired and the child was killed.
    pub timed_out: bool,
    /// The retained output tail (merged stdout and stderr), at most
    /// [`TAIL_BUFFER_SIZE`] bytes.
    pub tail: Vec<u8>,
    /// Total output lines seen.
    pub lines: u64,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl ExecutionResult {
    /// True when the command ran and exited zero. Dry runs count as
    /// successful.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_none_or(|s| s.success())
    }

    /// The exit code, when the platform reported one.
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// The output tail as lossy UTF-8.
    pub fn tail_text(&self) -> String {
        String::from_utf8_lossy(&self.tail).into_owned()
    }
}

/// Trait for command execution, so the orchestrator and targets can be
/// tested against recording mocks.
pub trait CommandExecutor: Send + Sync {
    /// Executes a command to completion, streaming its output.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}

/// Executes commands as real child processes.
pub struct RealCommandExecutor {
    /// When set, commands are logged but not executed.
    pub dry_run: bool,
    /// When set, task output is not echoed to the console (the tail is
    /// still retained).
    pub quiet: bool,
}

impl RealCommandExecutor {
    /// Creates an executor that actually runs commands.
    pub fn new() -> Self {
        Self {
            dry_run: false,
            quiet: false,
        }
    }
}

impl Default for RealCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let started = Instant::now();

        if self.dry_run {
            tracing::info!(command = %spec.display(), "dry run: would execute");
            return Ok(ExecutionResult {
                status: None,
                timed_out: false,
                tail: Vec::new(),
                lines: 0,
                duration: started.elapsed(),
            });
        }

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());

        let mut child = command.spawn().map_err(|e| {
            anyhow::anyhow!("failed to spawn `{}`: {}", spec.display(), e)
        })?;
        tracing::trace!(command = %spec.program, pid = child.id(), "spawned command");

        let sink = Arc::new(Mutex::new(OutputSink {
            tail: TailBuffer::new(TAIL_BUFFER_SIZE),
            lines: 0,
            prefix: spec.prefix.clone(),
            quiet: self.quiet,
        }));

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_sink = Arc::clone(&sink);
        let stdout_handle = thread::Builder::new()
            .name("stdout-reader".to_string())
            .spawn(move || read_pipe(stdout_pipe, &stdout_sink))
            .map_err(|e| anyhow::anyhow!("failed to spawn stdout reader thread: {}", e))?;

        let stderr_sink = Arc::clone(&sink);
        let stderr_handle = match thread::Builder::new()
            .name("stderr-reader".to_string())
            .spawn(move || read_pipe(stderr_pipe, &stderr_sink))
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_handle.join();
                anyhow::bail!("failed to spawn stderr reader thread: {}", e);
            }
        };

        // Poll for exit, enforcing the deadline.
        let deadline = spec.deadline.map(|d| started + d);
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    anyhow::bail!("failed to wait for `{}`: {}", spec.display(), e);
                }
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                tracing::warn!(command = %spec.program, "deadline expired, killing");
                let _ = child.kill();
                timed_out = true;
                break child.wait().ok();
            }
            thread::sleep(POLL_INTERVAL);
        };

        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        let (tail, lines) = {
            let sink = sink.lock().expect("output sink poisoned");
            (sink.tail.snapshot(), sink.lines)
        };

        Ok(ExecutionResult {
            status,
            timed_out,
            tail,
            lines,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> RealCommandExecutor {
        RealCommandExecutor {
            dry_run: false,
            quiet: true,
        }
    }

    #[test]
    fn test_tail_buffer_keeps_recent_lines() {
        let mut buf = TailBuffer::new(16);
        buf.push_line(b"first line\n");
        buf.push_line(b"second\n");
        buf.push_line(b"third\n");
        let snapshot = buf.snapshot();
        assert!(snapshot.len() <= 16);
        assert!(snapshot.ends_with(b"third\n"));
        // The tail starts at a line boundary, not mid-line.
        assert!(snapshot.starts_with(b"second\n"));
    }

    #[test]
    fn test_tail_buffer_truncates_oversized_line() {
        let mut buf = TailBuffer::new(8);
        buf.push_line(b"0123456789abcdef\n");
        let snapshot = buf.snapshot();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.ends_with(b"abcdef\n"));
    }

    #[test]
    fn test_tail_buffer_stays_within_bound_across_pushes() {
        let mut buf = TailBuffer::new(32);
        for i in 0..100 {
            buf.push_line(format!("line number {}\n", i).as_bytes());
        }
        let snapshot = buf.snapshot();
        assert!(snapshot.len() <= 32);
        assert!(snapshot.ends_with(b"line number 99\n"));
    }

    #[test]
    fn test_successful_command() {
        let spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "echo hello".into()]);
        let result = quiet().execute(&spec).unwrap();
        assert!(result.success());
        assert_eq!(result.code(), Some(0));
        assert_eq!(result.lines, 1);
        assert!(result.tail_text().contains("hello"));
    }

    #[test]
    fn test_failing_command() {
        let spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "echo oops >&2; exit 3".into()]);
        let result = quiet().execute(&spec).unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), Some(3));
        assert!(result.tail_text().contains("oops"));
    }

    #[test]
    fn test_merged_streams_share_tail() {
        let spec = CommandSpec::new(
            "/bin/sh",
            vec!["-c".into(), "echo out; echo err >&2".into()],
        );
        let result = quiet().execute(&spec).unwrap();
        assert_eq!(result.lines, 2);
        let tail = result.tail_text();
        assert!(tail.contains("out"));
        assert!(tail.contains("err"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "sleep 30".into()])
            .with_deadline(Duration::from_millis(200));
        let started = Instant::now();
        let result = quiet().execute(&spec).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let marker = std::env::temp_dir().join(format!("sykli-dry-{}", uuid::Uuid::new_v4()));
        let spec = CommandSpec::new(
            "/bin/sh",
            vec!["-c".into(), format!("touch {}", marker.display())],
        );
        let executor = RealCommandExecutor {
            dry_run: true,
            quiet: true,
        };
        let result = executor.execute(&spec).unwrap();
        assert!(result.success());
        assert!(result.status.is_none());
        assert!(!marker.exists());
    }

    #[test]
    fn test_cwd_respected() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "pwd".into()])
            .with_cwd(cwd.clone());
        let result = quiet().execute(&spec).unwrap();
        assert!(result.tail_text().trim().ends_with(cwd.file_name().unwrap()));
    }

    #[test]
    fn test_env_injected() {
        let spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "echo $SYKLI_TEST_VAR".into()])
            .with_envs([("SYKLI_TEST_VAR", "injected")]);
        let result = quiet().execute(&spec).unwrap();
        assert!(result.tail_text().contains("injected"));
    }
}
