//! Input guard - request field sanitization and SSRF-checked fetching

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use input_guard::{
    cli::{Cli, Command},
    config::Config,
    security::{SanitizationPolicy, SsrfGuard, Verdict, sanitize},
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckUrl { url }) => run_check_url(&config, &url).await,
        Some(Command::Sanitize { text, max_length }) => run_sanitize(&config, &text, max_length),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> input_guard::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Print the verdict for a single URL
async fn run_check_url(config: &Config, url: &str) -> ExitCode {
    let guard = SsrfGuard::new(config.ssrf.resolve_timeout);
    match guard.verdict(url).await {
        Verdict::Allow => {
            println!("allow");
            ExitCode::SUCCESS
        }
        Verdict::Deny => {
            println!("deny");
            ExitCode::FAILURE
        }
    }
}

/// Print the sanitized form of `text`
fn run_sanitize(config: &Config, text: &str, max_length: Option<usize>) -> ExitCode {
    let policy = match max_length {
        Some(n) => SanitizationPolicy::new(n),
        None => config.sanitizer.policy(),
    };
    match policy {
        Ok(policy) => {
            println!("{}", sanitize(text, &policy));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the HTTP server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting input guard"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
