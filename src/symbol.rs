//! Read-only symbol configuration consumed by command validation.
//!
//! Admin CRUD over `symbol_configs` lives outside this crate; this module
//! only loads the table and periodically refreshes it so a status flip
//! (trading → halt) is observed within one poll interval, following the
//! same "never crash on reload error, keep the old snapshot" rule the
//! teacher's config watcher uses.

use crate::core_types::{AssetId, SymbolId};
use rustc_hash::FxHashMap;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingStatus {
    Trading,
    Halt,
    CancelOnly,
}

impl TradingStatus {
    pub fn accepts_new_orders(self) -> bool {
        matches!(self, TradingStatus::Trading)
    }

    pub fn accepts_cancels(self) -> bool {
        matches!(self, TradingStatus::Trading | TradingStatus::CancelOnly)
    }

    fn from_db(v: &str) -> Self {
        match v {
            "halt" => TradingStatus::Halt,
            "cancel_only" => TradingStatus::CancelOnly,
            _ => TradingStatus::Trading,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub symbol_id: SymbolId,
    pub symbol: String,
    pub base_asset_id: AssetId,
    pub quote_asset_id: AssetId,
    pub lot_size: u64,
    pub tick_size: u64,
    pub min_qty: u64,
    pub max_qty: u64,
    pub min_notional: u64,
    pub maker_fee_rate: u64,
    pub taker_fee_rate: u64,
    pub status: TradingStatus,
}

impl SymbolConfig {
    pub fn validate_qty(&self, qty: u64) -> bool {
        qty >= self.min_qty && qty <= self.max_qty && qty % self.lot_size == 0
    }

    pub fn validate_price(&self, price: u64) -> bool {
        price > 0 && price % self.tick_size == 0
    }

    pub fn validate_notional(&self, price: u64, qty: u64) -> bool {
        (price as u128 * qty as u128) >= self.min_notional as u128
    }
}

/// Read-mostly registry shared across the router, clearing service, and
/// command validator. Refreshed on an interval via `watch`.
#[derive(Clone)]
pub struct SymbolRegistry {
    inner: Arc<RwLock<FxHashMap<SymbolId, SymbolConfig>>>,
}

impl SymbolRegistry {
    pub fn empty() -> Self {
        Self { inner: Arc::new(RwLock::new(FxHashMap::default())) }
    }

    pub async fn get(&self, symbol_id: SymbolId) -> Option<SymbolConfig> {
        self.inner.read().await.get(&symbol_id).cloned()
    }

    /// Seeds the registry with an already-loaded snapshot, e.g. at startup
    /// before the background refresh loop's first tick.
    pub async fn replace(&self, snapshot: FxHashMap<SymbolId, SymbolConfig>) {
        *self.inner.write().await = snapshot;
    }

    pub async fn load_from_db(pool: &PgPool) -> Result<FxHashMap<SymbolId, SymbolConfig>, sqlx::Error> {
        let rows = sqlx::query!(
            r#"
            SELECT symbol_id, symbol, base_asset_id, quote_asset_id,
                   lot_size, tick_size, min_qty, max_qty, min_notional,
                   maker_fee_rate, taker_fee_rate, status
            FROM symbol_configs
            "#
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let cfg = SymbolConfig {
                    symbol_id: r.symbol_id as SymbolId,
                    symbol: r.symbol,
                    base_asset_id: r.base_asset_id as AssetId,
                    quote_asset_id: r.quote_asset_id as AssetId,
                    lot_size: r.lot_size as u64,
                    tick_size: r.tick_size as u64,
                    min_qty: r.min_qty as u64,
                    max_qty: r.max_qty as u64,
                    min_notional: r.min_notional as u64,
                    maker_fee_rate: r.maker_fee_rate as u64,
                    taker_fee_rate: r.taker_fee_rate as u64,
                    status: TradingStatus::from_db(&r.status),
                };
                (cfg.symbol_id, cfg)
            })
            .collect())
    }

    /// Background refresh loop. Never replaces the snapshot on a failed
    /// load — a transient DB hiccup should not halt a trading symbol.
    pub async fn watch(self, pool: PgPool, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            match Self::load_from_db(&pool).await {
                Ok(fresh) => {
                    *self.inner.write().await = fresh;
                    tracing::debug!("symbol registry refreshed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "symbol registry refresh failed, keeping previous snapshot");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SymbolConfig {
        SymbolConfig {
            symbol_id: 1,
            symbol: "BTC-USDT".into(),
            base_asset_id: 1,
            quote_asset_id: 2,
            lot_size: 1,
            tick_size: 1,
            min_qty: 10,
            max_qty: 1_000_000,
            min_notional: 1000,
            maker_fee_rate: 1000,
            taker_fee_rate: 2000,
            status: TradingStatus::Trading,
        }
    }

    #[test]
    fn rejects_qty_outside_lot_and_bounds() {
        let cfg = sample();
        assert!(cfg.validate_qty(100));
        assert!(!cfg.validate_qty(5));
        assert!(!cfg.validate_qty(2_000_000));
    }

    #[test]
    fn halt_status_rejects_new_orders_but_allows_cancel() {
        let cfg = SymbolConfig { status: TradingStatus::Halt, ..sample() };
        assert!(!cfg.status.accepts_new_orders());
        assert!(!cfg.status.accepts_cancels());

        let cfg = SymbolConfig { status: TradingStatus::CancelOnly, ..sample() };
        assert!(!cfg.status.accepts_new_orders());
        assert!(cfg.status.accepts_cancels());
    }

    #[tokio::test]
    async fn registry_starts_empty_and_returns_none() {
        let reg = SymbolRegistry::empty();
        assert!(reg.get(1).await.is_none());
    }
}
