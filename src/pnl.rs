//! Realized P&L for a closed trade

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::{JournalError, Result};
use crate::models::TradeType;

/// BUY: `(exit - entry) * lot`, SELL: `(entry - exit) * lot`. No rounding.
pub fn compute_pnl(
    trade_type: TradeType,
    entry_price: Decimal,
    exit_price: Decimal,
    lot_size: Decimal,
) -> Result<Decimal> {
    let movement = match trade_type {
        TradeType::Buy => exit_price.checked_sub(entry_price),
        TradeType::Sell => entry_price.checked_sub(exit_price),
    }
    .ok_or_else(|| overflow(trade_type, entry_price, exit_price, lot_size))?;

    movement
        .checked_mul(lot_size)
        .ok_or_else(|| overflow(trade_type, entry_price, exit_price, lot_size))
}

/// Converts a float read from untyped storage, rejecting NaN and infinities
pub fn finite_decimal(field: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(JournalError::InvalidInput(format!(
            "{} is not a finite number: {}",
            field, value
        )));
    }
    Decimal::from_f64(value).ok_or_else(|| {
        JournalError::InvalidInput(format!("{} is out of range: {}", field, value))
    })
}

/// Exact sum of `values`; `InvalidInput` when it leaves the decimal range
pub fn checked_total<I>(what: &str, values: I) -> Result<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(value))
        .ok_or_else(|| JournalError::InvalidInput(format!("{} exceeds the decimal range", what)))
}

fn overflow(trade_type: TradeType, entry: Decimal, exit: Decimal, lot: Decimal) -> JournalError {
    JournalError::InvalidInput(format!(
        "P&L overflows for {} lot={} entry={} exit={}",
        trade_type, lot, entry, exit
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_profit() {
        let pnl = compute_pnl(TradeType::Buy, dec!(150.00), dec!(155.00), dec!(1)).unwrap();
        assert_eq!(pnl, dec!(5.00));
    }

    #[test]
    fn test_sell_profit() {
        let pnl = compute_pnl(TradeType::Sell, dec!(100.00), dec!(90.00), dec!(2)).unwrap();
        assert_eq!(pnl, dec!(20.00));
    }

    #[test]
    fn test_losses_are_negative() {
        let buy = compute_pnl(TradeType::Buy, dec!(2000.50), dec!(1990.25), dec!(0.5)).unwrap();
        assert_eq!(buy, dec!(-5.125)); // (1990.25 - 2000.50) * 0.5

        let sell = compute_pnl(TradeType::Sell, dec!(1990), dec!(2001), dec!(3)).unwrap();
        assert_eq!(sell, dec!(-33));
    }

    #[test]
    fn test_no_rounding_applied() {
        let pnl = compute_pnl(TradeType::Buy, dec!(1.0001), dec!(1.0004), dec!(0.01)).unwrap();
        assert_eq!(pnl, dec!(0.000003));
    }

    #[test]
    fn test_directions_are_mirrored() {
        let entry = dec!(2345.67);
        let exit = dec!(2350.12);
        let lot = dec!(0.3);

        let buy = compute_pnl(TradeType::Buy, entry, exit, lot).unwrap();
        let sell = compute_pnl(TradeType::Sell, entry, exit, lot).unwrap();

        assert_eq!(buy, (exit - entry) * lot);
        assert_eq!(sell, (entry - exit) * lot);
        assert_eq!(buy, -sell);
    }

    #[test]
    fn test_overflow_is_invalid_input() {
        let result = compute_pnl(TradeType::Buy, Decimal::MIN, Decimal::MAX, dec!(2));
        assert!(matches!(result, Err(JournalError::InvalidInput(_))));
    }

    #[test]
    fn test_finite_decimal_accepts_plain_floats() {
        assert_eq!(finite_decimal("entry_price", 150.25).unwrap(), dec!(150.25));
        assert_eq!(finite_decimal("lot_size", 2.0).unwrap(), dec!(2));
    }

    #[test]
    fn test_finite_decimal_rejects_non_finite() {
        let result = finite_decimal("entry_price", f64::NAN);
        assert!(matches!(result, Err(JournalError::InvalidInput(_))));

        let result = finite_decimal("exit_price", f64::INFINITY);
        assert!(matches!(result, Err(JournalError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_direction_is_invalid_input() {
        let result = "HOLD".parse::<TradeType>();
        assert!(matches!(result, Err(JournalError::InvalidInput(_))));
    }

    #[test]
    fn test_checked_total() {
        assert_eq!(checked_total("pnl", [dec!(5.00), dec!(20.00)]).unwrap(), dec!(25.00));
        assert_eq!(checked_total("pnl", Vec::new()).unwrap(), Decimal::ZERO);

        let result = checked_total("pnl", [Decimal::MAX, dec!(1)]);
        assert!(matches!(result, Err(JournalError::InvalidInput(_))));
    }
}
