//! CLI command definitions for the `stepline` binary.

pub mod instance;
pub mod user;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Durable workflow trigger and status service.
#[derive(Parser)]
#[command(name = "stepline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server and the workflow engine.
    Serve {
        /// Port to listen on (overrides config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Show the status of one workflow instance.
    Status {
        /// Instance ID returned by the trigger endpoint.
        instance_id: String,
    },

    /// List recent workflow instances.
    #[command(alias = "ls")]
    Instances {
        /// Filter by status (queued, running, sleeping, completed, failed).
        #[arg(long)]
        status: Option<String>,

        /// Filter by workflow type.
        #[arg(long)]
        workflow: Option<String>,

        /// Maximum number of instances to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Manage users read by workflow steps.
    User {
        #[command(subcommand)]
        action: user::UserCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
