mod aggregate;
mod cli;
mod config;
mod error;
mod filter;
mod loader;
mod normalize;
mod registry;
mod reports;
mod session;
mod storage;
mod tickets;

use clap::Parser;
use directories::ProjectDirs;
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{debug, error, info};

use crate::cli::Cli;
use crate::config::Config;
use crate::error::TicketPulseError;

fn main() {
    if let Err(err) = run() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), TicketPulseError> {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("", "", "ticketpulse").ok_or_else(|| {
        TicketPulseError::Error("Could not determine project directories".to_string())
    })?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path(&project_dirs));
    let config = Config::load_config(&config_path);

    // Logging stops when the handle is dropped
    let _logger = setup_logging(&project_dirs, &config)?;

    info!("ticketpulse {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());
    debug!("Using config file {}", config_path.display());

    cli.execute(&config)
}

fn setup_logging(
    project_dirs: &ProjectDirs,
    config: &Config,
) -> Result<LoggerHandle, TicketPulseError> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    let handle = Logger::try_with_str(config.logging.log_spec())?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename("ticketpulse"),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()?;

    Ok(handle)
}
