//! Command-line interface definitions for sykli.
//!
//! This module defines the CLI structure using the `clap` crate: the
//! `run`, `validate`, `cache` and `completions` subcommands and their
//! arguments. It is a type-safe representation of the user's input; the
//! behaviour lives in the library entry points.

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use clap_complete::Shell;

/// Top-level CLI structure and entry point for argument parsing.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// The available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute the pipeline described by the given JSON file.
    ///
    /// Parses, validates, expands and runs the task graph: cache checks
    /// on entry, level-parallel execution, cache store on success, run
    /// history under `.sykli/runs/`.
    Run(RunArgs),

    /// Validate a pipeline file without executing it.
    ///
    /// Parses the JSON, runs structural validation, expands matrices and
    /// resolves capabilities, then prints the resulting task plan.
    Validate(ValidateArgs),

    /// Inspect or clean the content-addressed cache.
    Cache(CacheArgs),

    /// Generate shell completion scripts.
    ///
    /// The generated script should be sourced in your shell's
    /// configuration file or saved to its completion directory, e.g.
    /// `eval "$(sykli completions bash)"`.
    Completions(CompletionsArgs),
}

/// Arguments shared by `run` and `validate`.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to the pipeline JSON file emitted by an SDK.
    #[arg(short, long, default_value = "sykli.json", value_hint = ValueHint::FilePath)]
    pub file: Utf8PathBuf,

    /// Log level controlling output verbosity.
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

/// Which target executes the tasks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    /// The local container runtime plus a plain shell.
    Local,
    /// Label-based dispatch across mesh nodes, falling back to local.
    Distributed,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Walk the whole pipeline but log commands instead of executing
    /// them; gates and cache writes are skipped.
    #[arg(long)]
    pub dry_run: bool,

    /// Pipeline workdir; defaults to the current directory.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub workdir: Option<Utf8PathBuf>,

    /// Where tasks execute.
    #[arg(long, value_enum, default_value = "local")]
    pub target: TargetKind,

    /// Overall run ceiling in seconds (default 600).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Disable the content-addressed cache for this run.
    #[arg(long)]
    pub no_cache: bool,

    /// Cache directory; defaults to `$HOME/.sykli/cache`.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub cache_dir: Option<Utf8PathBuf>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// The cache operation.
    #[command(subcommand)]
    pub command: CacheCommands,

    /// Cache directory; defaults to `$HOME/.sykli/cache`.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Log level controlling output verbosity.
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

/// Cache operations.
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print record/blob counts, total size and orphans.
    Stats,
    /// Remove cache entries.
    ///
    /// With `--older-than`, removes records older than the threshold and
    /// sweeps unreferenced blobs; without it, removes the entire cache.
    Clean {
        /// Age threshold in seconds.
        #[arg(long)]
        older_than: Option<u64>,
    },
}

/// Arguments for the `completions` command.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Log levels mapped onto the `tracing` crate's level filter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Parses command-line arguments into a structured `Cli` instance.
pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}
