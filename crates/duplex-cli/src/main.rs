//! CLI entry point - the composition root.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use duplex_cli::{Cli, Commands, handlers};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so `defaults` / `check` output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Defaults => handlers::defaults::execute()?,
        Commands::Check { file } => handlers::check::execute(&file)?,
        Commands::Simulate(args) => handlers::simulate::execute(&args)?,
    }

    Ok(())
}
