use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{JournalError, Result};

pub const DEFAULT_SYMBOL: &str = "XAUUSD";
pub const DEFAULT_DATABASE_PATH: &str = "trading_journal.db";

pub const ENV_CONFIG: &str = "TRADING_JOURNAL_CONFIG";
pub const ENV_DATABASE: &str = "TRADING_JOURNAL_DB";
pub const ENV_SYMBOL: &str = "TRADING_JOURNAL_SYMBOL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub database_path: PathBuf,
    /// The single instrument this journal tracks
    pub symbol: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            symbol: DEFAULT_SYMBOL.to_string(),
        }
    }
}

impl JournalConfig {
    /// Defaults, then the JSON file at `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok()).validated()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            JournalError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| JournalError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(symbol) = lookup(ENV_SYMBOL) {
            self.symbol = symbol;
        }
        self
    }

    pub fn validated(mut self) -> Result<Self> {
        self.symbol = self.symbol.trim().to_ascii_uppercase();
        if self.symbol.is_empty() {
            return Err(JournalError::Config("symbol must not be empty".to_string()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(JournalError::Config("database_path must not be empty".to_string()));
        }
        Ok(self)
    }
}
