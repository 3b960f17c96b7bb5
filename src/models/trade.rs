use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JournalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "BUY",
            TradeType::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeType::Buy),
            "SELL" => Ok(TradeType::Sell),
            other => Err(JournalError::InvalidInput(format!(
                "unrecognized trade type '{}'",
                other
            ))),
        }
    }
}

/// OPEN is reserved: every trade recorded through the journal is CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => Err(JournalError::InvalidInput(format!(
                "unrecognized trade status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub trade_type: TradeType,
    pub lot_size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>, // Legacy rows may lack it
    pub profit_loss: Decimal,
    pub status: TradeStatus,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Raw "add trade" form as submitted by the dashboard.
///
/// Every field is optional text so that a missing or malformed value is
/// reported as a validation error instead of a decoding failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeForm {
    pub trade_date: Option<String>,
    pub trade_type: Option<String>,
    pub lot_size: Option<String>,
    pub entry_price: Option<String>,
    pub exit_price: Option<String>,
    pub notes: Option<String>,
}

/// A validated trade ready to be written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub trade_date: NaiveDate,
    pub trade_type: TradeType,
    pub lot_size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTradeResult {
    pub success: bool,
    pub trade_id: i64,
    pub data_version: u64,
}
