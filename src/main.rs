// src/main.rs

use clap::Parser;
use color_eyre::eyre::Result;
use crossterm::style::Stylize;
use fingerblast::config::{DEFAULT_COOLDOWN, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKERS, ScanConfig};
use fingerblast::logging::initialize_logging;
use fingerblast::{App, ConfigError, Error, ScanSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Scan domains for known content fingerprints.
#[derive(Parser, Debug)]
#[command(name = "fingerblast", version, about)]
struct Cli {
    /// File with one domain or URL per line
    #[arg(short, long, required_unless_present = "list")]
    input: Option<PathBuf>,

    /// File that matches are appended to
    #[arg(short, long, required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Maximum number of hosts scanned at once
    #[arg(short = 'c', long = "conns", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Per-request timeout in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: f64,

    /// Fingerprints to look for
    #[arg(short = 'p', long = "prints", num_args = 1.., required_unless_present = "list")]
    fingerprints: Vec<String>,

    /// Schemes to try, in order
    #[arg(long, num_args = 1.., default_values = ["http", "https"])]
    schemes: Vec<String>,

    /// Subdomains to try on bare names, after the name itself
    #[arg(long = "subdoms", num_args = 1..)]
    subdomains: Vec<String>,

    /// JSON file with extra fingerprint rules
    #[arg(long = "registry")]
    registry_file: Option<PathBuf>,

    /// Pause after each finished host, in milliseconds
    #[arg(long, default_value_t = DEFAULT_COOLDOWN.as_millis() as u64)]
    cooldown_ms: u64,

    /// Disable coloured terminal output
    #[arg(long)]
    no_color: bool,

    /// List the available fingerprints and exit
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn into_config(self) -> Result<ScanConfig, ConfigError> {
        ScanConfig::new(
            self.input.unwrap_or_default(),
            self.output.unwrap_or_default(),
            self.fingerprints,
        )
        .with_workers(self.workers)?
        .with_timeout_secs(self.timeout)?
        .with_schemes(&self.schemes)
        .map(|config| {
            config
                .with_subdomains(self.subdomains)
                .with_registry_file(self.registry_file)
                .with_cooldown(Duration::from_millis(self.cooldown_ms))
                .with_color(!self.no_color)
        })
    }
}

/// Exit statuses: 0 clean, 1 some line failed, 2 bad config or input, 130 interrupted.
fn exit_status(summary: &ScanSummary) -> u8 {
    if summary.interrupted {
        130
    } else if summary.failed > 0 {
        1
    } else {
        0
    }
}

fn list_fingerprints(config: &ScanConfig) -> Result<(), ConfigError> {
    let registry = config.available_registry()?;
    for rule in registry.iter() {
        let mut kinds = Vec::new();
        if rule.mode.url {
            kinds.push("url");
        }
        if rule.mode.matches {
            kinds.push("matches");
        }
        println!("{} [{}]", rule.name.as_str().bold(), kinds.join(", "));
    }
    Ok(())
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for interrupts.");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(None) {
        eprintln!("{} {e}", "warning: logging disabled:".yellow());
    }

    let list = cli.list;
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration.");
            eprintln!("{} {e}", "error:".red());
            return Ok(ExitCode::from(2));
        }
    };

    if list {
        if let Err(e) = list_fingerprints(&config) {
            eprintln!("{} {e}", "error:".red());
            return Ok(ExitCode::from(2));
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "fingerblast starting.");
    let app = App::new(config);
    match app.run_until(interrupted()).await {
        Ok(summary) => {
            if summary.failed > 0 {
                warn!(failed = summary.failed, "Some lines failed.");
            }
            Ok(ExitCode::from(exit_status(&summary)))
        }
        Err(e @ (Error::Config(_) | Error::Input(_))) => {
            error!(error = %e, "Scan could not start.");
            eprintln!("{} {e}", "error:".red());
            Ok(ExitCode::from(2))
        }
    }
}
