mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use ndb_config::{Config, ConfigError, LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings come from the config, so read it before anything
    // else; a broken file is reported once the command runs.
    let loaded = ndb_config::load_config(cli.global.config.as_deref());
    let log = loaded.as_ref().map(|c| c.log.clone()).unwrap_or_default();
    init_tracing(cli.global.verbose, &log);

    if let Err(err) = run(cli, loaded).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, log: &LogConfig) {
    let directive = match verbosity {
        0 => log.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match log.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli, loaded: Result<Config, ConfigError>) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        // Neither needs the configured sources.
        Command::Config(args) => commands::config_cmd::handle(&args, &global, loaded),
        Command::Serve(args) => commands::serve::handle(&args, &global).await,

        cmd => {
            let cfg = config::resolve(loaded?, &global);
            let ndb = config::open(&cfg).await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &ndb, &global).await;
            ndb.close().await;
            result
        }
    }
}
