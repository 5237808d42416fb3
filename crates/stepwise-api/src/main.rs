//! Stepwise CLI entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, sets up tracing, opens the data directory and
//! dispatches to the command handler.

mod cli;
mod state;

use anyhow::anyhow;
use clap::Parser;
use clap_complete::generate;
use stepwise_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = TracingOptions::from_verbosity(cli.verbose, cli.quiet);
    options.otel = cli.otel;
    init_tracing(&options).map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Template { action } => {
            cli::template::handle_template_command(action, &state, cli.json).await
        }
        Commands::Preview { id, input, owner } => {
            cli::preview::preview(&state, &id, &input, &owner, cli.json).await
        }
        Commands::Config => cli::config::show_config(&state, cli.json),
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
