pub mod cache;
pub mod cli;
pub mod condition;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hints;
pub mod history;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod target;

pub use error::SykliError;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::cache::CacheStore;
use crate::condition::ConditionContext;
use crate::executor::RealCommandExecutor;
use crate::graph::Pipeline;
use crate::orchestrator::{RunOptions, TaskStatus};
use crate::server::{RunEvent, RunServer};
use crate::target::Target;
use crate::target::distributed::{DistributedTarget, LocalOnlyMesh};
use crate::target::local::LocalTarget;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Loads a pipeline file and takes it through every graph stage: parse,
/// validate, matrix expansion, capability resolution.
///
/// Validation findings are reported together, every error and then a
/// single failure, so the author fixes them in one round trip.
pub fn prepare_pipeline(path: &Utf8Path) -> Result<Pipeline> {
    let mut pipeline = graph::load_pipeline(path)
        .with_context(|| format!("failed to load pipeline from {}", path))?;

    let report = graph::validate::validate(&pipeline.tasks);
    for warning in &report.warnings {
        warn!("validation warning: {}", warning);
    }
    if !report.valid {
        for err in &report.errors {
            error!("validation error: {}", err);
        }
        bail!("pipeline validation failed with {} error(s)", report.errors.len());
    }

    pipeline.tasks = graph::matrix::expand(pipeline.tasks);
    graph::capability::resolve(&mut pipeline.tasks)
        .context("capability resolution failed")?;

    Ok(pipeline)
}

fn build_target(
    kind: cli::TargetKind,
    workdir: Utf8PathBuf,
    executor: Arc<RealCommandExecutor>,
) -> Arc<dyn Target> {
    let local = LocalTarget::new(workdir, executor);
    match kind {
        cli::TargetKind::Local => Arc::new(local),
        cli::TargetKind::Distributed => {
            Arc::new(DistributedTarget::new(local, Box::new(LocalOnlyMesh)))
        }
    }
}

/// Executes the `run` subcommand. Returns true when every task
/// succeeded or was skipped.
pub fn run_pipeline(args: &cli::RunArgs) -> Result<bool> {
    if args.dry_run {
        warn!("DRY-RUN MODE: commands will be logged, not executed");
    }

    let pipeline = prepare_pipeline(args.common.file.as_path())?;

    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => Utf8PathBuf::from_path_buf(
            std::env::current_dir().context("failed to read current directory")?,
        )
        .map_err(|p| anyhow::anyhow!("current directory is not UTF-8: {}", p.display()))?,
    };

    let cache = if args.no_cache {
        None
    } else {
        let root = args
            .cache_dir
            .clone()
            .unwrap_or_else(CacheStore::default_root);
        Some(CacheStore::new(root))
    };

    let executor = Arc::new(RealCommandExecutor {
        dry_run: args.dry_run,
        quiet: false,
    });
    let target = build_target(args.target, workdir.clone(), executor);

    let opts = RunOptions {
        workdir: workdir.clone(),
        cache,
        context: ConditionContext::from_env(),
        dry_run: args.dry_run,
        streaks: history::success_streaks(&workdir),
    };

    let ceiling = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(server::DEFAULT_RUN_CEILING);

    let run_server = Arc::new(RunServer::new());
    // The history writer consumes the same bus any subscriber would.
    let events = run_server.bus().subscribe();

    let outcome = run_server
        .run_sync(pipeline, target, opts, ceiling)
        .map_err(anyhow::Error::from)?;

    // Recover our run id from the subscription and persist history.
    let run_id = std::iter::from_fn(|| events.try_recv().ok()).find_map(|event| match event {
        RunEvent::RunStarted { run, .. } => Some(run),
        _ => None,
    });
    if let Some(id) = run_id
        && let Some(run) = run_server.run(&id)
        && let Err(e) = history::write_run(&workdir, &run, &outcome)
    {
        warn!(error = %e, "failed to write run history");
    }

    let succeeded = outcome
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Succeeded)
        .count();
    let cached = outcome.results.iter().filter(|r| r.cached).count();
    let skipped = outcome
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Skipped)
        .count();

    match &outcome.error {
        None => {
            info!(
                succeeded,
                cached, skipped, "pipeline completed successfully"
            );
            Ok(true)
        }
        Some(e) => {
            error!("pipeline failed: {}", e);
            Ok(false)
        }
    }
}

/// Executes the `validate` subcommand: full graph preparation, then the
/// task plan by level, without running anything.
pub fn run_validate(args: &cli::ValidateArgs) -> Result<()> {
    let pipeline = prepare_pipeline(args.common.file.as_path())?;

    info!(
        version = %pipeline.version,
        tasks = pipeline.tasks.len(),
        resources = pipeline.resources.len(),
        "pipeline is valid"
    );
    for (index, level) in graph::level::assign(&pipeline.tasks).iter().enumerate() {
        let names: Vec<&str> = level.iter().map(|t| t.name.as_str()).collect();
        info!("level {}: {}", index, names.join(", "));
    }
    Ok(())
}

/// Executes the `cache` subcommand.
pub fn run_cache(args: &cli::CacheArgs) -> Result<()> {
    let root = args
        .cache_dir
        .clone()
        .unwrap_or_else(CacheStore::default_root);
    let store = CacheStore::new(&root);

    match &args.command {
        cli::CacheCommands::Stats => {
            let stats = store.stats()?;
            info!(
                records = stats.meta_count,
                blobs = stats.blob_count,
                bytes = stats.blob_bytes,
                orphans = stats.orphan_blobs,
                "cache stats for {}",
                root
            );
        }
        cli::CacheCommands::Clean { older_than } => match older_than {
            Some(age) => {
                let report = store.clean_older_than(*age)?;
                info!(
                    meta_removed = report.meta_removed,
                    blobs_removed = report.blobs_removed,
                    "cache GC complete"
                );
            }
            None => {
                store.clean()?;
                info!("cache removed: {}", root);
            }
        },
    }
    Ok(())
}
