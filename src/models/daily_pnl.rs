use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-date roll-up of closed trades, recomputed on every read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub total_pnl: Decimal,
    pub trade_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingStats {
    pub total_trades: i64,
    pub closed_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_lot_size: Decimal,
    pub best_trade: Option<Decimal>,
    pub worst_trade: Option<Decimal>,
}

/// Stored P&L that no longer matches the formula applied to the stored prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlDiscrepancy {
    pub trade_id: i64,
    pub stored: Decimal,
    pub expected: Decimal,
}
