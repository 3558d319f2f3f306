//! CLI command definitions for the `flowrun` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod agents;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run agent workflows as dependency graphs.
#[derive(Parser)]
#[command(name = "flowrun", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "FLOWRUN_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file and print every issue found.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Execute a workflow and stream its events.
    Run {
        /// Workflow YAML file, or the name of a workflow in the workflow directory.
        target: String,

        /// Initial run input as a JSON document.
        #[arg(long)]
        input: Option<String>,

        /// Dry run: back every agent the workflow uses with the echo agent.
        #[arg(long)]
        echo: bool,
    },

    /// List configured agents.
    Agents {
        /// Check each agent's health first.
        #[arg(long)]
        check: bool,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
