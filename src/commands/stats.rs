use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::commands::trades::list_trades;
use crate::db::row::required_decimal_at;
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{DailyPnl, PnlDiscrepancy, Trade, TradeStatus, TradingStats};
use crate::pnl::{checked_total, compute_pnl};

/// Per-day P&L for the calendar, newest day first.
///
/// Only days with at least one closed trade appear.
pub fn daily_pnl(db: &Database) -> Result<Vec<DailyPnl>> {
    let conn = db.conn.lock()?;

    let mut stmt = conn.prepare(
        "SELECT trade_date, profit_loss
         FROM trades
         WHERE status = ? AND symbol = ?",
    )?;

    let rows = stmt.query_map(
        rusqlite::params![TradeStatus::Closed.as_str(), db.symbol()],
        |row| Ok((row.get::<_, NaiveDate>(0)?, required_decimal_at(row, 1)?)),
    )?;

    let mut daily_map: BTreeMap<NaiveDate, (Decimal, i64)> = BTreeMap::new();
    for row in rows {
        let (date, pnl) = row?;
        let entry = daily_map.entry(date).or_insert((Decimal::ZERO, 0));
        entry.0 = entry.0.checked_add(pnl).ok_or_else(|| {
            JournalError::InvalidInput(format!("P&L total for {} exceeds the decimal range", date))
        })?;
        entry.1 += 1;
    }

    Ok(daily_map
        .into_iter()
        .rev()
        .map(|(date, (total_pnl, trade_count))| DailyPnl {
            date,
            total_pnl,
            trade_count,
        })
        .collect())
}

/// Summary cards for all trades, or for a single day
pub fn trading_stats(db: &Database, filter_date: Option<NaiveDate>) -> Result<TradingStats> {
    let trades = list_trades(db, filter_date)?;
    summarize(&trades)
}

pub fn summarize(trades: &[Trade]) -> Result<TradingStats> {
    let closed: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.status == TradeStatus::Closed)
        .collect();

    let winning_trades = closed.iter().filter(|t| t.profit_loss > Decimal::ZERO).count() as i64;
    let losing_trades = closed.iter().filter(|t| t.profit_loss < Decimal::ZERO).count() as i64;
    let closed_trades = closed.len() as i64;

    let win_rate = if closed_trades > 0 {
        (winning_trades as f64 / closed_trades as f64) * 100.0
    } else {
        0.0
    };

    let total_pnl = checked_total("total P&L", closed.iter().map(|t| t.profit_loss))?;

    let avg_lot_size = if trades.is_empty() {
        Decimal::ZERO
    } else {
        let lots = checked_total("total lot size", trades.iter().map(|t| t.lot_size))?;
        lots.checked_div(Decimal::from(trades.len())).ok_or_else(|| {
            JournalError::InvalidInput("average lot size is out of range".to_string())
        })?
    };

    Ok(TradingStats {
        total_trades: trades.len() as i64,
        closed_trades,
        winning_trades,
        losing_trades,
        win_rate,
        total_pnl,
        avg_lot_size,
        best_trade: closed.iter().map(|t| t.profit_loss).max(),
        worst_trade: closed.iter().map(|t| t.profit_loss).min(),
    })
}

/// Trades whose stored P&L disagrees with the formula applied to their stored fields
pub fn audit_profit_loss(db: &Database) -> Result<Vec<PnlDiscrepancy>> {
    let mut discrepancies = Vec::new();

    for trade in list_trades(db, None)? {
        let Some(exit_price) = trade.exit_price else {
            continue;
        };

        let expected = compute_pnl(trade.trade_type, trade.entry_price, exit_price, trade.lot_size)?;
        if expected != trade.profit_loss {
            discrepancies.push(PnlDiscrepancy {
                trade_id: trade.id,
                stored: trade.profit_loss,
                expected,
            });
        }
    }

    Ok(discrepancies)
}

/// Runs the audit and reports each mismatch; returns how many were found
pub fn log_pnl_discrepancies(db: &Database) -> Result<usize> {
    let discrepancies = audit_profit_loss(db)?;
    for d in &discrepancies {
        log::warn!(
            "Trade {} stores P&L {} but its prices give {}",
            d.trade_id,
            d.stored,
            d.expected
        );
    }
    if discrepancies.is_empty() {
        log::info!("P&L audit passed");
    }
    Ok(discrepancies.len())
}
