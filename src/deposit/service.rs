//! Deposit confirmation and crediting. Three steps, each individually
//! idempotent: record the sighting, advance confirmations, credit once
//! confirmed — a restart anywhere in this sequence just repeats the last
//! unfinished step instead of double-crediting.

use crate::clearing::ClearingService;
use crate::clearing::service::EffectRequest;
use crate::core_types::{AssetId, UserId};
use crate::errors::{CoreError, ErrorKind};
use rustc_hash::FxHashMap;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositState {
    Pending,
    Confirmed,
    Credited,
}

impl DepositState {
    fn as_str(self) -> &'static str {
        match self {
            DepositState::Pending => "pending",
            DepositState::Confirmed => "confirmed",
            DepositState::Credited => "credited",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "confirmed" => DepositState::Confirmed,
            "credited" => DepositState::Credited,
            _ => DepositState::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: String,
    pub required_confirmations: i64,
    pub enabled: bool,
}

pub struct DepositService {
    pool: PgPool,
    clearing: Arc<ClearingService>,
    networks: FxHashMap<String, NetworkConfig>,
}

impl DepositService {
    pub fn new(pool: PgPool, clearing: Arc<ClearingService>, networks: Vec<NetworkConfig>) -> Self {
        Self { pool, clearing, networks: networks.into_iter().map(|n| (n.network.clone(), n)).collect() }
    }

    fn network(&self, network: &str) -> Result<&NetworkConfig, CoreError> {
        let cfg = self.networks.get(network).ok_or_else(|| CoreError::new(ErrorKind::NetworkNotFound, network.to_string()))?;
        if !cfg.enabled {
            return Err(CoreError::new(ErrorKind::DepositDisabled, network.to_string()));
        }
        Ok(cfg)
    }

    /// Step 1: record a pending sighting, idempotent on `(network, txid, vout)`.
    pub async fn record_pending(
        &self,
        network: &str,
        txid: &str,
        vout: i32,
        user_id: UserId,
        asset: AssetId,
        address: &str,
        amount: i64,
        confirmations: i64,
    ) -> Result<i64, CoreError> {
        self.network(network)?;

        let row = sqlx::query!(
            r#"
            INSERT INTO deposits (network, txid, vout, user_id, asset, address, amount, confirmations, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (network, txid, vout) DO NOTHING
            RETURNING id
            "#,
            network,
            txid,
            vout,
            user_id as i64,
            asset as i32,
            address,
            amount,
            confirmations,
            DepositState::Pending.as_str(),
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.id),
            None => {
                let existing = sqlx::query_scalar!(
                    "SELECT id FROM deposits WHERE network = $1 AND txid = $2 AND vout = $3",
                    network,
                    txid,
                    vout,
                )
                .fetch_one(&self.pool)
                .await?;
                Ok(existing)
            }
        }
    }

    /// Step 2: refresh confirmations, transitioning pending -> confirmed
    /// once the network's required depth is reached.
    pub async fn refresh_confirmations(&self, deposit_id: i64, confirmations: i64) -> Result<(), CoreError> {
        let row = sqlx::query!("SELECT network, state FROM deposits WHERE id = $1 FOR UPDATE", deposit_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, "deposit not found"))?;

        let state = DepositState::from_str(&row.state);
        if state != DepositState::Pending {
            return Ok(());
        }

        let required = self.network(&row.network)?.required_confirmations;
        let new_state = if confirmations >= required { DepositState::Confirmed } else { DepositState::Pending };

        sqlx::query!(
            "UPDATE deposits SET confirmations = $1, state = $2 WHERE id = $3",
            confirmations,
            new_state.as_str(),
            deposit_id,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Step 3: invoke the idempotent `Credit` with `idempotency_key =
    /// deposit:<id>`, then mark the row `credited`. Crediting first mirrors
    /// `WithdrawService::complete` (ledger effect before state flip): a
    /// crash between the two leaves the row `confirmed` and a replay simply
    /// re-runs `credit`, which is a no-op against the existing ledger entry.
    /// Flipping the state first would instead risk a credited deposit with
    /// no ledger entry if the process died right after the commit.
    pub async fn credit_if_confirmed(&self, deposit_id: i64) -> Result<(), CoreError> {
        let row = sqlx::query!("SELECT user_id, asset, amount, state FROM deposits WHERE id = $1", deposit_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, "deposit not found"))?;

        if DepositState::from_str(&row.state) != DepositState::Confirmed {
            return Ok(());
        }

        self.clearing
            .credit(EffectRequest {
                idempotency_key: format!("deposit:{deposit_id}"),
                user_id: row.user_id as UserId,
                asset: row.asset as AssetId,
                amount: row.amount,
                ref_type: "deposit",
                ref_id: deposit_id.to_string(),
            })
            .await?;

        sqlx::query!("UPDATE deposits SET state = $1 WHERE id = $2", DepositState::Credited.as_str(), deposit_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_network_is_rejected_before_any_db_call() {
        let networks =
            vec![NetworkConfig { network: "btc".into(), required_confirmations: 3, enabled: false }];
        let pool = PgPool::connect_lazy("postgres://localhost/invalid").unwrap();
        let clearing = Arc::new(ClearingService::new(
            pool.clone(),
            Arc::new(crate::clearing::store::PostgresBalanceStore::new(pool.clone())),
            Arc::new(crate::clearing::Ledger::new(pool.clone())),
        ));
        let svc = DepositService::new(pool, clearing, networks);
        let err = svc.network("btc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DepositDisabled);
    }

    #[tokio::test]
    async fn unknown_network_is_not_found() {
        let pool = PgPool::connect_lazy("postgres://localhost/invalid").unwrap();
        let clearing = Arc::new(ClearingService::new(
            pool.clone(),
            Arc::new(crate::clearing::store::PostgresBalanceStore::new(pool.clone())),
            Arc::new(crate::clearing::Ledger::new(pool.clone())),
        ));
        let svc = DepositService::new(pool, clearing, vec![]);
        let err = svc.network("eth").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkNotFound);
    }
}
