use std::path::PathBuf;

use trading_journal_lib::config::ENV_CONFIG;
use trading_journal_lib::JournalConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON protocol
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));

    let config = JournalConfig::load(config_path.as_deref())?;
    trading_journal_lib::run(config).await
}
