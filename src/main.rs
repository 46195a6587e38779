mod bomb_machine;
mod bombs;
mod cli;
mod clubs;
mod config;
mod database;
mod error;
mod ledger;
mod locks;
mod members;
mod pipeline;
mod quotas;
mod reconcile;
mod reports;
mod scheduler;
mod schema;
mod sources;
mod utils;

use directories::ProjectDirs;
use log::error;

use crate::cli::Cli;
use crate::config::{Config, CONFIG};
use crate::database::Database;

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "clubpulse") else {
        eprintln!("Could not determine a home directory for configuration");
        std::process::exit(1);
    };

    let config = CONFIG
        .get_or_init(|| Config::load_config(&project_dirs))
        .clone();

    // The handle must stay alive for the life of the process
    let _logger = match flexi_logger::Logger::try_with_str(&config.logging.clubpulse)
        .and_then(|logger| logger.start())
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let db = match Database::new(project_dirs.data_local_dir()) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("Failed to open database: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = Cli::handle_command_line(config, db) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
