mod aggregator;
mod cli;
mod config;
mod db;
mod error;
mod forms;
mod locations;
mod monthly;
mod partitions;
mod pipeline;
mod reconciliation;
mod rollup;
mod sql;
mod utils;

use std::path::PathBuf;

use clap::Parser;
use cli::Cli;
use config::Config;
use directories::ProjectDirs;
use error::AggError;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

fn setup_logging(config: &Config, log_dir: PathBuf) -> Result<LoggerHandle, AggError> {
    Logger::try_with_str(format!("icds_agg={}", config.logging.icds_agg))
        .and_then(|logger| {
            logger
                .log_to_file(FileSpec::default().directory(log_dir).basename("icds_agg"))
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(flexi_logger::detailed_format)
                .rotate(
                    Criterion::Size(10 * 1024 * 1024),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(10),
                )
                .start()
        })
        .map_err(|e| AggError::Error(format!("cannot start logging: {}", e)))
}

fn main() {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("", "", "icds-agg");
    let data_dir = match &project_dirs {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => PathBuf::from("."),
    };
    let config_path = match (&cli.config, &project_dirs) {
        (Some(path), _) => path.clone(),
        (None, Some(dirs)) => Config::default_config_path(dirs),
        (None, None) => data_dir.join("config.toml"),
    };
    let config = Config::load_config(&config_path);

    // The handle flushes and closes the log file when dropped
    let _logger = match setup_logging(&config, data_dir.join("logs")) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("{}", err);
            None
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = cli.execute(&config) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
