//! The enforced `Balance` type.
//!
//! Fields are private; every mutation goes through a checked method that
//! returns `Result` and bumps `version`. This is the in-memory mirror of a
//! `balances` row — `BalanceStore` is what actually persists it under a
//! row lock, this type only knows how to apply one delta correctly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Balance {
    available: i64,
    frozen: i64,
    version: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient available balance")]
    InsufficientAvailable,
    #[error("insufficient frozen balance")]
    InsufficientFrozen,
    #[error("arithmetic overflow")]
    Overflow,
}

impl Balance {
    pub fn zero() -> Self {
        Self { available: 0, frozen: 0, version: 0 }
    }

    pub fn new(available: i64, frozen: i64, version: i64) -> Self {
        Self { available, frozen, version }
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn frozen(&self) -> i64 {
        self.frozen
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// `available -= amount`, `frozen += amount`. Used by withdraw request
    /// and order placement.
    pub fn freeze(&mut self, amount: i64) -> Result<(), BalanceError> {
        if self.available < amount {
            return Err(BalanceError::InsufficientAvailable);
        }
        self.available = self.available.checked_sub(amount).ok_or(BalanceError::Overflow)?;
        self.frozen = self.frozen.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `available += amount`, `frozen -= amount`. Used on withdraw
    /// reject/fail and order cancel.
    pub fn unfreeze(&mut self, amount: i64) -> Result<(), BalanceError> {
        if self.frozen < amount {
            return Err(BalanceError::InsufficientFrozen);
        }
        self.frozen = self.frozen.checked_sub(amount).ok_or(BalanceError::Overflow)?;
        self.available = self.available.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `frozen -= amount`. Funds leave the ledger entirely (withdraw
    /// complete, trade's paying leg).
    pub fn deduct(&mut self, amount: i64) -> Result<(), BalanceError> {
        if self.frozen < amount {
            return Err(BalanceError::InsufficientFrozen);
        }
        self.frozen = self.frozen.checked_sub(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `available += amount`. New funds enter the ledger (deposit, trade's
    /// receiving leg).
    pub fn credit(&mut self, amount: i64) -> Result<(), BalanceError> {
        self.available = self.available.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Applies a settlement leg delta split into an available part and a
    /// frozen part, per the six-leg settlement rule in `clearing::service`:
    /// `available_delta = max(d, 0)`, `frozen_delta = min(d, 0)`.
    pub fn apply_settlement_leg(&mut self, available_delta: i64, frozen_delta: i64) -> Result<(), BalanceError> {
        let new_available = self.available.checked_add(available_delta).ok_or(BalanceError::Overflow)?;
        let new_frozen = self.frozen.checked_add(frozen_delta).ok_or(BalanceError::Overflow)?;
        if new_available < 0 {
            return Err(BalanceError::InsufficientAvailable);
        }
        if new_frozen < 0 {
            return Err(BalanceError::InsufficientFrozen);
        }
        self.available = new_available;
        self.frozen = new_frozen;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_moves_available_to_frozen_and_bumps_version() {
        let mut bal = Balance::new(1000, 0, 3);
        bal.freeze(400).unwrap();
        assert_eq!(bal.available(), 600);
        assert_eq!(bal.frozen(), 400);
        assert_eq!(bal.version(), 4);
    }

    #[test]
    fn freeze_rejects_insufficient_available() {
        let mut bal = Balance::new(100, 0, 0);
        assert_eq!(bal.freeze(200), Err(BalanceError::InsufficientAvailable));
        assert_eq!(bal.available(), 100);
        assert_eq!(bal.version(), 0);
    }

    #[test]
    fn unfreeze_reverses_freeze() {
        let mut bal = Balance::new(600, 400, 4);
        bal.unfreeze(400).unwrap();
        assert_eq!(bal.available(), 1000);
        assert_eq!(bal.frozen(), 0);
    }

    #[test]
    fn deduct_removes_from_frozen_only() {
        let mut bal = Balance::new(0, 400, 4);
        bal.deduct(400).unwrap();
        assert_eq!(bal.frozen(), 0);
        assert_eq!(bal.available(), 0);
    }

    #[test]
    fn deduct_rejects_insufficient_frozen() {
        let mut bal = Balance::new(0, 100, 0);
        assert_eq!(bal.deduct(200), Err(BalanceError::InsufficientFrozen));
    }

    #[test]
    fn credit_increases_available() {
        let mut bal = Balance::zero();
        bal.credit(500).unwrap();
        assert_eq!(bal.available(), 500);
        assert_eq!(bal.version(), 1);
    }

    #[test]
    fn settlement_leg_moves_frozen_to_available_on_maker_side() {
        // Maker sold base: frozen base decreases (the locked qty), no available change.
        let mut bal = Balance::new(0, 1000, 2);
        bal.apply_settlement_leg(0, -1000).unwrap();
        assert_eq!(bal.frozen(), 0);
        assert_eq!(bal.available(), 0);
    }

    #[test]
    fn settlement_leg_credits_taker_receiving_side() {
        let mut bal = Balance::new(0, 0, 0);
        bal.apply_settlement_leg(1000, 0).unwrap();
        assert_eq!(bal.available(), 1000);
    }

    #[test]
    fn settlement_leg_rejects_negative_result() {
        let mut bal = Balance::new(0, 500, 0);
        assert_eq!(bal.apply_settlement_leg(0, -600), Err(BalanceError::InsufficientFrozen));
    }
}
