//! AppSync + Neptune synthesizer entry point.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use appsync_neptune::command;
use appsync_neptune::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        stack = %config.stack_name,
        variant = ?config.variant,
        "Synthesizer starting",
    );

    match command::run(&config, &mut std::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Synthesis failed");
            ExitCode::FAILURE
        }
    }
}
