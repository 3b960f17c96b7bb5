pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod pnl;

use anyhow::Context;
use tokio::io::BufReader;

pub use config::JournalConfig;
pub use db::Database;
pub use error::{JournalError, Result};

/// Opens the journal described by `config` and serves dashboard commands on
/// stdin/stdout until stdin closes.
pub async fn run(config: JournalConfig) -> anyhow::Result<()> {
    let db_path = config
        .database_path
        .to_str()
        .context("Database path is not valid UTF-8")?;

    if let Some(dir) = config.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {:?}", dir))?;
    }

    log::info!("Database path: {:?}", config.database_path);
    log::info!("Tracking symbol {}", config.symbol);

    let database = match Database::open(db_path, &config.symbol) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Database initialization failed: {}", e);
            if let Some(dir) = config.database_path.parent() {
                log::error!(
                    "Pre-migration backups, if any, are in {:?}. Restore the newest one to recover.",
                    dir.join("backups")
                );
            }
            return Err(e).context("Database initialization failed");
        }
    };

    commands::log_pnl_discrepancies(&database).context("P&L audit failed")?;

    ipc::serve(
        &database,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}
