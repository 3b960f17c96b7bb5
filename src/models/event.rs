use serde::{Deserialize, Serialize};

/// Notifications pushed to the UI after the store changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum JournalEvent {
    TradesChanged { trade_id: i64, data_version: u64 },
}
