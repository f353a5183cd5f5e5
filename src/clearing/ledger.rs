//! Append-only ledger journal. `idempotency_key` is the sole source of
//! truth for "has this effect already happened" — there is deliberately no
//! in-memory cache, so a restart loses nothing.

use crate::core_types::{AssetId, UserId};
use crate::errors::CoreError;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub asset: AssetId,
    pub available_delta: i64,
    pub frozen_delta: i64,
    pub available_after: i64,
    pub frozen_after: i64,
    pub reason: &'static str,
    pub ref_type: &'static str,
    pub ref_id: String,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub idempotency_key: String,
    pub user_id: UserId,
    pub asset: AssetId,
    pub available_delta: i64,
    pub frozen_delta: i64,
    pub available_after: i64,
    pub frozen_after: i64,
    pub reason: String,
    pub ref_type: String,
    pub ref_id: String,
    pub created_at_ms: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateIdempotencyKey,
}

pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts one ledger row inside the caller's transaction. A duplicate
    /// `idempotency_key` is not an error — it means this effect already
    /// happened and the caller should treat the command as already applied.
    pub async fn try_insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: NewLedgerEntry,
    ) -> Result<InsertOutcome, CoreError> {
        let created_at_ms = Utc::now().timestamp_millis();
        let result = sqlx::query!(
            r#"
            INSERT INTO ledger_entries
                (idempotency_key, user_id, asset, available_delta, frozen_delta,
                 available_after, frozen_after, reason, ref_type, ref_id, created_at_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
            entry.idempotency_key,
            entry.user_id as i64,
            entry.asset as i32,
            entry.available_delta,
            entry.frozen_delta,
            entry.available_after,
            entry.frozen_after,
            entry.reason,
            entry.ref_type,
            entry.ref_id,
            created_at_ms,
        )
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::DuplicateIdempotencyKey)
        }
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>, CoreError> {
        let row = sqlx::query!(
            r#"
            SELECT id, idempotency_key, user_id, asset, available_delta, frozen_delta,
                   available_after, frozen_after, reason, ref_type, ref_id, created_at_ms
            FROM ledger_entries WHERE idempotency_key = $1
            "#,
            key,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LedgerEntry {
            id: r.id,
            idempotency_key: r.idempotency_key,
            user_id: r.user_id as UserId,
            asset: r.asset as AssetId,
            available_delta: r.available_delta,
            frozen_delta: r.frozen_delta,
            available_after: r.available_after,
            frozen_after: r.frozen_after,
            reason: r.reason,
            ref_type: r.ref_type,
            ref_id: r.ref_id,
            created_at_ms: r.created_at_ms,
        }))
    }

    /// Backs the `(user_id, created_at_ms DESC)` index — used both by
    /// account statements and by the reconciliation helper below.
    pub async fn list_for_user(&self, user_id: UserId, limit: i64) -> Result<Vec<LedgerEntry>, CoreError> {
        let rows = sqlx::query!(
            r#"
            SELECT id, idempotency_key, user_id, asset, available_delta, frozen_delta,
                   available_after, frozen_after, reason, ref_type, ref_id, created_at_ms
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at_ms DESC
            LIMIT $2
            "#,
            user_id as i64,
            limit,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LedgerEntry {
                id: r.id,
                idempotency_key: r.idempotency_key,
                user_id: r.user_id as UserId,
                asset: r.asset as AssetId,
                available_delta: r.available_delta,
                frozen_delta: r.frozen_delta,
                available_after: r.available_after,
                frozen_after: r.frozen_after,
                reason: r.reason,
                ref_type: r.ref_type,
                ref_id: r.ref_id,
                created_at_ms: r.created_at_ms,
            })
            .collect())
    }

    /// Replays a user's ledger entries for one asset and checks the running
    /// total against the balance row's current `available`/`frozen` — a
    /// point-in-time reconciliation check, not part of the hot path.
    pub async fn reconcile_user_asset(
        &self,
        user_id: UserId,
        asset: AssetId,
        current_available: i64,
        current_frozen: i64,
    ) -> Result<bool, CoreError> {
        let rows = sqlx::query!(
            r#"
            SELECT available_delta, frozen_delta FROM ledger_entries
            WHERE user_id = $1 AND asset = $2
            ORDER BY created_at_ms ASC
            "#,
            user_id as i64,
            asset as i32,
        )
        .fetch_all(&self.pool)
        .await?;

        let (mut available, mut frozen) = (0i64, 0i64);
        for row in rows {
            available += row.available_delta;
            frozen += row.frozen_delta;
        }

        Ok(available == current_available && frozen == current_frozen)
    }
}
