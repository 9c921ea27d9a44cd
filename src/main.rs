use std::io;
use std::process;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::error;

use sykli::cli;

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    // Handle completions before setting up logging so the generated
    // script stays clean.
    if let cli::Commands::Completions(opts) = &args.command {
        let mut cmd = cli::Cli::command();
        generate(opts.shell, &mut cmd, "sykli", &mut io::stdout());
        return Ok(());
    }

    let log_level = match &args.command {
        cli::Commands::Run(opts) => opts.common.log_level,
        cli::Commands::Validate(opts) => opts.common.log_level,
        cli::Commands::Cache(opts) => opts.log_level,
        cli::Commands::Completions(_) => unreachable!("completions handled above"),
    };
    sykli::init_logging(log_level)?;

    match &args.command {
        cli::Commands::Run(opts) => match sykli::run_pipeline(opts) {
            Ok(true) => {}
            Ok(false) => process::exit(1),
            Err(e) => {
                error!("{:#}", e);
                process::exit(1);
            }
        },
        cli::Commands::Validate(opts) => {
            if let Err(e) = sykli::run_validate(opts) {
                error!("{:#}", e);
                process::exit(1);
            }
        }
        cli::Commands::Cache(opts) => {
            if let Err(e) = sykli::run_cache(opts) {
                error!("{:#}", e);
                process::exit(1);
            }
        }
        cli::Commands::Completions(_) => {
            unreachable!("completions handled earlier");
        }
    }

    Ok(())
}
