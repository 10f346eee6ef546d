mod cli;
mod commands;
mod error;
mod hooks;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Reports go to stdout; logs stay on stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = shadowgraph_config::load_config(cli.global.config.as_deref())?;
    tracing::debug!(command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Run(args) => commands::run::handle(config, args).await,
        Command::Check(ref args) => commands::check::handle(&config, args, &cli.global).await,
        Command::Reactions => commands::reactions::handle(&config, &cli.global),
        Command::Config => commands::config_cmd::handle(&config),
    }
}
