//! Reconciles `trades` tables written by earlier versions of the journal.
//!
//! Older installations may be missing columns, declare timestamps as text,
//! lack NOT NULL/CHECK constraints and hold rows whose P&L was never
//! populated. Such a table is rebuilt into the current shape: every row is
//! normalized and copied into a fresh table created by the `trades`
//! migration. Rows that cannot be normalized are moved to `trades_rejected`
//! so a single bad row never breaks reads of the whole journal.
//!
//! A table already in the current shape is left untouched, so running this
//! again changes nothing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{JournalError, Result};
use crate::models::{TradeStatus, TradeType};
use crate::pnl::{compute_pnl, finite_decimal};

const CREATE_TRADES_SQL: &str = include_str!("migrations/001_create_trades.sql");

/// Column, declared type and NOT NULL flag of a current `trades` table
const CURRENT_COLUMNS: &[(&str, &str, bool)] = &[
    ("id", "INTEGER", false),
    ("symbol", "TEXT", true),
    ("trade_date", "TEXT", true),
    ("date", "TEXT", true),
    ("trade_type", "TEXT", true),
    ("lot_size", "TEXT", true),
    ("entry_price", "TEXT", true),
    ("exit_price", "TEXT", false),
    ("profit_loss", "TEXT", true),
    ("status", "TEXT", true),
    ("notes", "TEXT", false),
    ("created_at", "INTEGER", true),
    ("updated_at", "INTEGER", true),
];

/// Columns a legacy table must already have; without them rows cannot be
/// identified or attributed to an instrument.
const BASE_COLUMNS: &[&str] = &["id", "symbol"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rebuilt: bool,
    pub columns_added: Vec<&'static str>,
    pub rows_backfilled: usize,
    pub pnl_backfilled: usize,
    pub pnl_unrecoverable: usize,
    pub rows_rejected: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        !self.rebuilt
            && self.columns_added.is_empty()
            && self.rows_backfilled == 0
            && self.pnl_backfilled == 0
            && self.pnl_unrecoverable == 0
            && self.rows_rejected == 0
    }
}

#[derive(Debug, Clone)]
struct TableColumn {
    name: String,
    decl_type: String,
    not_null: bool,
}

pub fn reconcile_trades(conn: &Connection) -> Result<ReconcileReport> {
    let columns = table_columns(conn, "trades")?;

    for column in BASE_COLUMNS {
        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)) {
            return Err(JournalError::Migration(format!(
                "trades table has no '{}' column and cannot be reconciled",
                column
            )));
        }
    }

    if is_current_shape(&columns) {
        return Ok(ReconcileReport::default());
    }

    let report = rebuild_trades(conn, &columns)?;

    log::info!(
        "Rebuilt trades table: {} columns added, {} rows back-filled, {} P&L values computed, {} defaulted to 0, {} rows rejected",
        report.columns_added.len(),
        report.rows_backfilled,
        report.pnl_backfilled,
        report.pnl_unrecoverable,
        report.rows_rejected
    );

    Ok(report)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name=?",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<TableColumn>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?)")?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(TableColumn {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn is_current_shape(columns: &[TableColumn]) -> bool {
    CURRENT_COLUMNS.iter().all(|(name, decl_type, not_null)| {
        columns.iter().any(|c| {
            c.name.eq_ignore_ascii_case(name)
                && c.decl_type.eq_ignore_ascii_case(decl_type)
                && c.not_null == *not_null
        })
    })
}

fn is_current_column(name: &str) -> bool {
    CURRENT_COLUMNS
        .iter()
        .any(|(current, _, _)| current.eq_ignore_ascii_case(name))
}

fn rebuild_trades(conn: &Connection, columns: &[TableColumn]) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        rebuilt: true,
        columns_added: CURRENT_COLUMNS
            .iter()
            .map(|(name, _, _)| *name)
            .filter(|name| !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
            .collect(),
        ..ReconcileReport::default()
    };

    // Columns the journal does not know about are carried over as-is
    let extras: Vec<&TableColumn> = columns.iter().filter(|c| !is_current_column(&c.name)).collect();

    let tx = conn.unchecked_transaction()?;

    let rows = read_legacy_rows(&tx)?;

    tx.execute_batch("ALTER TABLE trades RENAME TO trades_legacy;")?;
    tx.execute_batch(CREATE_TRADES_SQL)?;
    for extra in &extras {
        tx.execute_batch(&format!(
            "ALTER TABLE trades ADD COLUMN \"{}\" {};",
            extra.name, extra.decl_type
        ))?;
        log::info!("Kept legacy column trades.{}", extra.name);
    }

    let mut insert_columns: Vec<String> = CURRENT_COLUMNS
        .iter()
        .map(|(name, _, _)| format!("\"{}\"", name))
        .collect();
    insert_columns.extend(extras.iter().map(|c| format!("\"{}\"", c.name)));
    let insert_sql = format!(
        "INSERT INTO trades ({}) VALUES ({})",
        insert_columns.join(", "),
        vec!["?"; insert_columns.len()].join(", ")
    );

    for row in &rows {
        match normalize(row) {
            Ok(trade) => {
                let mut values = trade.values();
                values.extend(extras.iter().map(|c| row.raw(&c.name).cloned().unwrap_or(Value::Null)));
                tx.execute(&insert_sql, params_from_iter(values))?;

                if trade.backfilled {
                    report.rows_backfilled += 1;
                }
                match trade.pnl_source {
                    PnlSource::Stored => {}
                    PnlSource::Computed => report.pnl_backfilled += 1,
                    PnlSource::Defaulted => report.pnl_unrecoverable += 1,
                }
            }
            Err(reason) => {
                log::warn!("Moving trade {} to trades_rejected: {}", row.describe_id(), reason);
                reject(&tx, row, &reason)?;
                report.rows_rejected += 1;
            }
        }
    }

    tx.execute_batch("DROP TABLE trades_legacy;")?;
    tx.commit()?;

    Ok(report)
}

fn reject(conn: &Connection, row: &LegacyRow, reason: &str) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS trades_rejected (
            id INTEGER,
            reason TEXT NOT NULL,
            row_json TEXT NOT NULL,
            rejected_at INTEGER NOT NULL
        );",
    )?;

    let id = match row.raw("id") {
        Some(Value::Integer(id)) => Some(*id),
        _ => None,
    };

    conn.execute(
        "INSERT INTO trades_rejected (id, reason, row_json, rejected_at) VALUES (?, ?, ?, ?)",
        params![id, reason, row.to_json(), Utc::now().timestamp()],
    )?;
    Ok(())
}

/// One row of a legacy table, keyed by lower-cased column name
#[derive(Debug)]
struct LegacyRow {
    values: HashMap<String, Value>,
}

fn read_legacy_rows(conn: &Connection) -> Result<Vec<LegacyRow>> {
    let mut stmt = conn.prepare("SELECT * FROM trades ORDER BY id")?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();

    let rows = stmt
        .query_map([], |row| {
            let mut values = HashMap::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                values.insert(name.clone(), row.get::<_, Value>(idx)?);
            }
            Ok(LegacyRow { values })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

impl LegacyRow {
    /// Stored value, with NULL reported as absent
    fn raw(&self, column: &str) -> Option<&Value> {
        self.values
            .get(&column.to_ascii_lowercase())
            .filter(|v| !matches!(v, Value::Null))
    }

    fn text(&self, column: &str) -> Option<String> {
        match self.raw(column)? {
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    fn decimal(&self, column: &str) -> std::result::Result<Option<Decimal>, String> {
        match self.raw(column) {
            None => Ok(None),
            Some(Value::Integer(i)) => Ok(Some(Decimal::from(*i))),
            Some(Value::Real(f)) => finite_decimal(column, *f).map(Some).map_err(|e| e.to_string()),
            Some(Value::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::Text(s)) => Decimal::from_str(s.trim())
                .map(Some)
                .map_err(|_| format!("{} '{}' is not a number", column, s)),
            Some(_) => Err(format!("{} holds binary data", column)),
        }
    }

    fn timestamp(&self, column: &str) -> Option<i64> {
        match self.raw(column)? {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.is_finite() => Some(*f as i64),
            Value::Text(s) => parse_timestamp(s.trim()),
            _ => None,
        }
    }

    fn describe_id(&self) -> String {
        self.text("id").unwrap_or_else(|| "without id".to_string())
    }

    fn to_json(&self) -> String {
        let map: Map<String, JsonValue> = self
            .values
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    Value::Null | Value::Blob(_) => JsonValue::Null,
                    Value::Integer(i) => JsonValue::from(*i),
                    Value::Real(f) => serde_json::Number::from_f64(*f)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null),
                    Value::Text(s) => JsonValue::String(s.clone()),
                };
                (name.clone(), json)
            })
            .collect();
        JsonValue::Object(map).to_string()
    }
}

/// Unix seconds, or a date/time string as written by SQLite, JavaScript or ISO 8601
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    parse_date_prefix(raw).map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp())
}

fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PnlSource {
    Stored,
    Computed,
    Defaulted,
}

#[derive(Debug)]
struct ReconciledTrade {
    id: i64,
    symbol: String,
    trade_date: NaiveDate,
    trade_type: TradeType,
    lot_size: Decimal,
    entry_price: Decimal,
    exit_price: Option<Decimal>,
    profit_loss: Decimal,
    status: TradeStatus,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
    backfilled: bool,
    pnl_source: PnlSource,
}

impl ReconciledTrade {
    /// Values in `CURRENT_COLUMNS` order
    fn values(&self) -> Vec<Value> {
        let date = Value::Text(self.trade_date.to_string());
        vec![
            Value::Integer(self.id),
            Value::Text(self.symbol.clone()),
            date.clone(),
            date,
            Value::Text(self.trade_type.as_str().to_string()),
            Value::Text(self.lot_size.to_string()),
            Value::Text(self.entry_price.to_string()),
            self.exit_price
                .map_or(Value::Null, |p| Value::Text(p.to_string())),
            Value::Text(self.profit_loss.to_string()),
            Value::Text(self.status.as_str().to_string()),
            self.notes.clone().map_or(Value::Null, Value::Text),
            Value::Integer(self.created_at),
            Value::Integer(self.updated_at),
        ]
    }
}

fn normalize(row: &LegacyRow) -> std::result::Result<ReconciledTrade, String> {
    let id = match row.raw("id") {
        Some(Value::Integer(id)) => *id,
        _ => return Err("id is not an integer".to_string()),
    };
    let symbol = row.text("symbol").ok_or("symbol is missing")?;

    let raw_type = row.text("trade_type").ok_or("trade_type is missing")?;
    let trade_type = raw_type
        .parse::<TradeType>()
        .map_err(|_| format!("unknown trade_type '{}'", raw_type))?;

    let lot_size = row.decimal("lot_size")?.ok_or("lot_size is missing")?;
    let entry_price = row.decimal("entry_price")?.ok_or("entry_price is missing")?;
    let exit_price = row.decimal("exit_price")?;

    let status = match row.text("status") {
        None => TradeStatus::Closed,
        Some(raw) => raw
            .parse::<TradeStatus>()
            .map_err(|_| format!("unknown status '{}'", raw))?,
    };

    // Attribution date: the stored trade_date, else the day the row was created
    let created = row.timestamp("created_at");
    let trade_date = row
        .text("trade_date")
        .and_then(|raw| parse_date_prefix(&raw))
        .or_else(|| {
            created
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive())
        })
        .ok_or("neither trade_date nor created_at holds a date")?;

    let created_at =
        created.unwrap_or_else(|| trade_date.and_time(NaiveTime::MIN).and_utc().timestamp());
    let updated_at = row.timestamp("updated_at").unwrap_or(created_at);

    let (profit_loss, pnl_source) = match row.decimal("profit_loss") {
        Ok(Some(stored)) => (stored, PnlSource::Stored),
        _ => match exit_price.map(|exit| compute_pnl(trade_type, entry_price, exit, lot_size)) {
            Some(Ok(pnl)) => (pnl, PnlSource::Computed),
            Some(Err(e)) => {
                log::warn!("Cannot back-fill P&L for trade {}: {}", id, e);
                (Decimal::ZERO, PnlSource::Defaulted)
            }
            None => (Decimal::ZERO, PnlSource::Defaulted),
        },
    };

    let date_text = trade_date.to_string();
    let is_integer = |column: &str| matches!(row.raw(column), Some(Value::Integer(_)));
    let backfilled = row.text("trade_date").as_deref() != Some(date_text.as_str())
        || row.text("date").as_deref() != Some(date_text.as_str())
        || row.raw("status").is_none()
        || !is_integer("created_at")
        || !is_integer("updated_at");

    Ok(ReconciledTrade {
        id,
        symbol,
        trade_date,
        trade_type,
        lot_size,
        entry_price,
        exit_price,
        profit_loss,
        status,
        notes: row.text("notes"),
        created_at,
        updated_at,
        backfilled,
        pnl_source,
    })
}
