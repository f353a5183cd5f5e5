//! Trade fee calculation.
//!
//! All fee rates use 10^6 precision: 1000 = 0.10%.

/// Fee rate precision (10^6 = 1,000,000).
pub const FEE_PRECISION: u64 = 1_000_000;

/// Default maker fee rate (1000 = 0.10%).
pub const DEFAULT_MAKER_FEE: u64 = 1000;

/// Default taker fee rate (2000 = 0.20%).
pub const DEFAULT_TAKER_FEE: u64 = 2000;

/// Computes the fee charged on `amount` at `rate` (10^6 precision).
///
/// Uses a u128 intermediate to avoid overflow, and rounds any non-zero
/// fractional fee up to 1 unit so fee income is never silently dropped.
#[inline]
pub fn calculate_fee(amount: u64, rate: u64) -> u64 {
    let fee = (amount as u128 * rate as u128) / FEE_PRECISION as u128;
    if fee == 0 && amount > 0 && rate > 0 {
        1
    } else {
        fee as u64
    }
}

/// Fee leg of a trade: `base` is charged against the base-asset proceeds
/// (the side receiving base), `quote` against the quote-asset proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TradeFees {
    pub maker_fee: u64,
    pub taker_fee: u64,
}

/// Computes the settlement fee pair for one trade leg, given the notional
/// each side receives and the symbol's configured maker/taker rates.
pub fn calculate_trade_fees(
    maker_receives: u64,
    taker_receives: u64,
    maker_rate: u64,
    taker_rate: u64,
) -> TradeFees {
    TradeFees {
        maker_fee: calculate_fee(maker_receives, maker_rate),
        taker_fee: calculate_fee(taker_receives, taker_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_fee() {
        assert_eq!(calculate_fee(100_000_000, 2000), 200_000);
        assert_eq!(calculate_fee(100_000_000, 1000), 100_000);
    }

    #[test]
    fn small_amount_rounds_up_to_minimum() {
        assert_eq!(calculate_fee(100, 1000), 1);
        assert_eq!(calculate_fee(1, 1000), 1);
    }

    #[test]
    fn zero_amount_or_rate_is_zero_fee() {
        assert_eq!(calculate_fee(0, 1000), 0);
        assert_eq!(calculate_fee(100_000, 0), 0);
    }

    #[test]
    fn no_overflow_at_large_amounts() {
        let large_amount: u64 = 10_000_000_000_000_000_000;
        assert_eq!(calculate_fee(large_amount, 2000), 20_000_000_000_000_000);
    }

    #[test]
    fn trade_fee_pair() {
        let fees = calculate_trade_fees(100_000_000, 5_000_000_000, 1000, 2000);
        assert_eq!(fees.maker_fee, 100_000);
        assert_eq!(fees.taker_fee, 1_000_000);
    }
}
