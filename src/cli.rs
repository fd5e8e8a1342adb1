//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Input guard - request field sanitization and SSRF-checked fetching
#[derive(Parser, Debug)]
#[command(name = "input-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "INPUT_GUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "INPUT_GUARD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "INPUT_GUARD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "INPUT_GUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "INPUT_GUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Check whether a URL may be fetched; exits non-zero when denied
    CheckUrl {
        /// Candidate URL
        #[arg(required = true)]
        url: String,
    },

    /// Sanitize a string and print the result
    Sanitize {
        /// Text to sanitize
        #[arg(required = true)]
        text: String,

        /// Override the configured maximum length
        #[arg(long)]
        max_length: Option<usize>,
    },
}
