use rusqlite::types::{Type, ValueRef};
use rusqlite::Row;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::pnl::finite_decimal;

/// Reads a decimal column regardless of the storage class it landed in.
///
/// Current schema stores decimals as text; legacy tables used NUMERIC, so the
/// same column can hold integers, reals or text.
pub fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(Decimal::from(i))),
        ValueRef::Real(f) => finite_decimal("column", f)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Real, Box::new(e))),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(rusqlite::Error::Utf8Error)?;
            Decimal::from_str(text.trim())
                .map(Some)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            Type::Blob,
        )),
    }
}

/// Like [`decimal_at`] for columns the schema declares NOT NULL
pub fn required_decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    decimal_at(row, idx)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, "decimal".to_string(), Type::Null))
}
