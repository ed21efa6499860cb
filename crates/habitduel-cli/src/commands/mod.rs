pub mod challenge;
pub mod config;
pub mod live;
pub mod settle;

use habitduel_core::{Config, CoreError, Database};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Open the configured database, or the default one under the data dir.
pub(crate) fn open_database(config: &Config) -> Result<Database, CoreError> {
    match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::open(),
    }
}
