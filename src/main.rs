use clap::Parser;
use tracing_subscriber::EnvFilter;

use beamdump::config::{Cli, Config};

fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(1);
        }
    };

    match beamdump::app::run(config) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(1);
        }
    }
}
