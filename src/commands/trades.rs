use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::db::row::{decimal_at, required_decimal_at};
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{CreateTradeResult, NewTrade, Trade, TradeForm, TradeStatus, TradeType};
use crate::pnl::compute_pnl;

const TRADE_COLUMNS: &str = "id, trade_date, symbol, trade_type, lot_size, entry_price, exit_price, \
                             profit_loss, status, notes, created_at, updated_at";

/// Helper function to map a database row to a Trade struct
fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    let parse_enum = |idx: usize, e: JournalError| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    };

    Ok(Trade {
        id: row.get(0)?,
        trade_date: row.get(1)?,
        symbol: row.get(2)?,
        trade_type: row
            .get::<_, String>(3)?
            .parse::<TradeType>()
            .map_err(|e| parse_enum(3, e))?,
        lot_size: required_decimal_at(row, 4)?,
        entry_price: required_decimal_at(row, 5)?,
        exit_price: decimal_at(row, 6)?,
        profit_loss: required_decimal_at(row, 7)?,
        status: row
            .get::<_, String>(8)?
            .parse::<TradeStatus>()
            .map_err(|e| parse_enum(8, e))?,
        notes: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Trades for the journal's symbol, newest attribution date first.
///
/// With `filter_date` only trades attributed to that day are returned.
pub fn list_trades(db: &Database, filter_date: Option<NaiveDate>) -> Result<Vec<Trade>> {
    let conn = db.conn.lock()?;

    let mut query = format!("SELECT {} FROM trades WHERE symbol = ?", TRADE_COLUMNS);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(db.symbol().to_string())];

    if let Some(date) = filter_date {
        query.push_str(" AND trade_date = ?");
        params.push(Box::new(date));
    }

    query.push_str(" ORDER BY trade_date DESC, created_at DESC, id DESC");

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query)?;
    let trades = stmt
        .query_map(param_refs.as_slice(), map_row_to_trade)?
        .collect::<rusqlite::Result<Vec<Trade>>>()?;

    Ok(trades)
}

pub fn get_trade(db: &Database, id: i64) -> Result<Trade> {
    let conn = db.conn.lock()?;

    conn.query_row(
        &format!("SELECT {} FROM trades WHERE id = ? AND symbol = ?", TRADE_COLUMNS),
        rusqlite::params![id, db.symbol()],
        map_row_to_trade,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => JournalError::NotFound(format!("trade {}", id)),
        other => other.into(),
    })
}

/// Records a closed trade submitted from the add-trade form
pub fn create_trade(db: &Database, form: TradeForm) -> Result<CreateTradeResult> {
    let trade = validate_trade_form(&form, Utc::now().date_naive())?;
    let profit_loss = compute_pnl(
        trade.trade_type,
        trade.entry_price,
        trade.exit_price,
        trade.lot_size,
    )?;

    let id = {
        let conn = db.conn.lock()?;
        let now = Utc::now().timestamp();

        // The old "date" column is written alongside trade_date
        conn.execute(
            "INSERT INTO trades (
                symbol, trade_date, \"date\", trade_type, lot_size,
                entry_price, exit_price, profit_loss, status, notes, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                db.symbol(),
                trade.trade_date,
                trade.trade_date,
                trade.trade_type.as_str(),
                trade.lot_size.to_string(),
                trade.entry_price.to_string(),
                trade.exit_price.to_string(),
                profit_loss.to_string(),
                TradeStatus::Closed.as_str(),
                trade.notes,
                now,
                now
            ],
        )?;

        conn.last_insert_rowid()
    };

    let data_version = db.notify_trades_changed(id);
    log::info!(
        "Recorded trade {} ({} {} @ {} -> {}, P&L {})",
        id,
        trade.trade_type,
        trade.lot_size,
        trade.entry_price,
        trade.exit_price,
        profit_loss
    );

    Ok(CreateTradeResult {
        success: true,
        trade_id: id,
        data_version,
    })
}

/// Turns raw form input into a [`NewTrade`], defaulting the date to `today`
pub fn validate_trade_form(form: &TradeForm, today: NaiveDate) -> Result<NewTrade> {
    let trade_date = match non_blank(&form.trade_date) {
        None => today,
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            JournalError::Validation(format!("tradeDate '{}' is not a YYYY-MM-DD date", raw))
        })?,
    };

    let trade_type = required(&form.trade_type, "tradeType")?
        .parse::<TradeType>()
        .map_err(|_| JournalError::Validation("tradeType must be BUY or SELL".to_string()))?;

    let lot_size = positive_decimal(&form.lot_size, "lotSize")?;
    let entry_price = positive_decimal(&form.entry_price, "entryPrice")?;
    let exit_price = positive_decimal(&form.exit_price, "exitPrice")?;

    Ok(NewTrade {
        trade_date,
        trade_type,
        lot_size,
        entry_price,
        exit_price,
        notes: non_blank(&form.notes).map(str::to_string),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    non_blank(value).ok_or_else(|| JournalError::Validation(format!("{} is required", field)))
}

fn positive_decimal(value: &Option<String>, field: &str) -> Result<Decimal> {
    let raw = required(value, field)?;
    let parsed = Decimal::from_str(raw)
        .map_err(|_| JournalError::Validation(format!("{} '{}' is not a number", field, raw)))?;

    if parsed <= Decimal::ZERO {
        return Err(JournalError::Validation(format!(
            "{} must be greater than zero",
            field
        )));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_database;
    use rust_decimal_macros::dec;

    fn form(date: &str, trade_type: &str, lot: &str, entry: &str, exit: &str) -> TradeForm {
        TradeForm {
            trade_date: Some(date.to_string()),
            trade_type: Some(trade_type.to_string()),
            lot_size: Some(lot.to_string()),
            entry_price: Some(entry.to_string()),
            exit_price: Some(exit.to_string()),
            notes: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_create_then_list_contains_trade_once() {
        let db = test_database();

        let result = create_trade(&db, form("2024-01-05", "BUY", "1", "150.00", "155.00")).unwrap();
        assert!(result.success);

        let trades = list_trades(&db, None).unwrap();
        let matching: Vec<_> = trades.iter().filter(|t| t.id == result.trade_id).collect();
        assert_eq!(matching.len(), 1);

        let trade = matching[0];
        assert_eq!(trade.profit_loss, dec!(5.00));
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.symbol, "XAUUSD");
        assert_eq!(trade.trade_date, date("2024-01-05"));
        assert_eq!(
            trade.profit_loss,
            compute_pnl(trade.trade_type, trade.entry_price, trade.exit_price.unwrap(), trade.lot_size)
                .unwrap()
        );
    }

    #[test]
    fn test_sell_trade_profit() {
        let db = test_database();
        let result = create_trade(&db, form("2024-01-05", "SELL", "2", "100.00", "90.00")).unwrap();

        let trade = get_trade(&db, result.trade_id).unwrap();
        assert_eq!(trade.trade_type, TradeType::Sell);
        assert_eq!(trade.profit_loss, dec!(20.00));
        assert_eq!(trade.lot_size, dec!(2));
    }

    #[test]
    fn test_decimal_values_round_trip_exactly() {
        let db = test_database();
        let result =
            create_trade(&db, form("2024-02-01", "BUY", "0.01", "2034.17", "2036.93")).unwrap();

        let trade = get_trade(&db, result.trade_id).unwrap();
        assert_eq!(trade.entry_price.to_string(), "2034.17");
        assert_eq!(trade.exit_price, Some(dec!(2036.93)));
        assert_eq!(trade.profit_loss, dec!(0.0276));
    }

    #[test]
    fn test_filter_by_date_returns_only_that_date() {
        let db = test_database();
        create_trade(&db, form("2024-01-05", "BUY", "1", "150", "155")).unwrap();
        create_trade(&db, form("2024-01-06", "SELL", "1", "150", "149")).unwrap();
        create_trade(&db, form("2024-01-05", "SELL", "2", "100", "90")).unwrap();

        let trades = list_trades(&db, Some(date("2024-01-05"))).unwrap();
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().all(|t| t.trade_date == date("2024-01-05")));

        let none = list_trades(&db, Some(date("2024-01-07"))).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_unfiltered_order_is_date_then_creation_descending() {
        let db = test_database();
        {
            let conn = db.conn.lock().unwrap();
            // Insertion order deliberately disagrees with creation order
            for (trade_date, created_at) in [
                ("2024-01-05", 300),
                ("2024-01-05", 100),
                ("2024-01-05", 200),
                ("2024-01-08", 50),
                ("2023-12-29", 999),
                ("2024-01-05", 200),
            ] {
                conn.execute(
                    "INSERT INTO trades (symbol, trade_date, \"date\", trade_type, lot_size, entry_price,
                                         exit_price, profit_loss, created_at, updated_at)
                     VALUES ('XAUUSD', ?1, ?1, 'BUY', '1', '150', '155', '5', ?2, ?2)",
                    rusqlite::params![trade_date, created_at],
                )
                .unwrap();
            }
        }

        let ids: Vec<i64> = list_trades(&db, None).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 1, 6, 3, 2, 5]);

        let all = list_trades(&db, None).unwrap();
        assert!(all.windows(2).all(|w| w[0].trade_date >= w[1].trade_date));
    }

    #[test]
    fn test_other_symbols_are_invisible() {
        let db = test_database();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO trades (symbol, trade_date, \"date\", trade_type, lot_size, entry_price, exit_price, profit_loss)
                 VALUES ('EURUSD', '2024-01-05', '2024-01-05', 'BUY', '1', '1.1', '1.2', '0.1')",
                [],
            )
            .unwrap();
        }

        assert!(list_trades(&db, None).unwrap().is_empty());
        assert!(matches!(get_trade(&db, 1), Err(JournalError::NotFound(_))));
    }

    #[test]
    fn test_legacy_date_column_kept_in_sync() {
        let db = test_database();
        let result = create_trade(&db, form("2024-03-15", "BUY", "1", "10", "11")).unwrap();

        let conn = db.conn.lock().unwrap();
        let (trade_date, legacy): (String, String) = conn
            .query_row(
                "SELECT trade_date, \"date\" FROM trades WHERE id = ?",
                [result.trade_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(trade_date, "2024-03-15");
        assert_eq!(legacy, "2024-03-15");
    }

    #[test]
    fn test_create_bumps_data_version_and_emits_event() {
        let db = test_database();
        let mut events = db.subscribe();

        let first = create_trade(&db, form("2024-01-05", "BUY", "1", "150", "155")).unwrap();
        let second = create_trade(&db, form("2024-01-05", "BUY", "1", "150", "155")).unwrap();
        assert_eq!(first.data_version, 1);
        assert_eq!(second.data_version, 2);

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_ok());
    }

    #[test]
    fn test_invalid_form_writes_nothing() {
        let db = test_database();
        let mut bad = form("2024-01-05", "BUY", "1", "150", "155");
        bad.exit_price = None;

        let result = create_trade(&db, bad);
        assert!(matches!(result, Err(JournalError::Validation(_))));
        assert!(list_trades(&db, None).unwrap().is_empty());
        assert_eq!(db.data_version(), 0);
    }

    #[test]
    fn test_validation_rules() {
        let today = date("2024-06-01");
        let ok = form("", "sell", "0.5", "2000", "1990");
        let trade = validate_trade_form(&ok, today).unwrap();
        assert_eq!(trade.trade_date, today);
        assert_eq!(trade.trade_type, TradeType::Sell);
        assert_eq!(trade.notes, None);

        let cases = [
            form("2024-01-05", "", "1", "150", "155"),
            form("2024-01-05", "HOLD", "1", "150", "155"),
            form("2024-01-05", "BUY", "abc", "150", "155"),
            form("2024-01-05", "BUY", "0", "150", "155"),
            form("2024-01-05", "BUY", "1", "-150", "155"),
            form("2024-01-05", "BUY", "1", "150", "NaN"),
            form("05/01/2024", "BUY", "1", "150", "155"),
        ];
        for case in cases {
            let result = validate_trade_form(&case, today);
            assert!(
                matches!(result, Err(JournalError::Validation(_))),
                "expected validation error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_notes_are_trimmed() {
        let mut with_notes = form("2024-01-05", "BUY", "1", "150", "155");
        with_notes.notes = Some("  London open breakout  ".to_string());

        let trade = validate_trade_form(&with_notes, date("2024-01-05")).unwrap();
        assert_eq!(trade.notes.as_deref(), Some("London open breakout"));
    }
}
