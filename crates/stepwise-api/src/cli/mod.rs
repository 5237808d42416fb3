//! CLI command definitions and dispatch for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (e.g., `stepwise template list`).

pub mod config;
pub mod preview;
pub mod template;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and manage reusable tool workflows.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow templates (import, list, show, export, delete).
    Template {
        #[command(subcommand)]
        action: template::TemplateCommand,
    },

    /// Dry-run a template: show how each step's input binds, without tools.
    Preview {
        /// Template id.
        id: String,

        /// Run input as a JSON object.
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// Owner namespace (falls back to shared templates).
        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },

    /// Print the effective engine configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
