//! Internal RPC surface consumed by the withdraw/deposit services and any
//! other first-party caller inside the trust boundary. Every request is
//! authenticated with a single shared `X-Internal-Token` header — this is
//! not a caller-facing API and carries no per-user auth.

use super::balance::Balance;
use super::service::{ClearingService, EffectRequest};
use crate::core_types::{AssetId, UserId};
use crate::errors::{CoreError, ErrorKind};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct RpcState {
    pub clearing: Arc<ClearingService>,
    pub internal_token: Arc<str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternalRpcRequest {
    pub idempotency_key: String,
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    pub asset: AssetId,
    pub amount: i64,
    pub ref_type: String,
    #[serde(rename = "RefID")]
    pub ref_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternalRpcResponse {
    pub success: bool,
    pub error_code: Option<&'static str>,
    pub balance: Option<BalanceView>,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub available: i64,
    pub frozen: i64,
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/internal/freeze", post(freeze))
        .route("/internal/unfreeze", post(unfreeze))
        .route("/internal/deduct", post(deduct))
        .route("/internal/credit", post(credit))
        .with_state(state)
}

fn check_token(headers: &HeaderMap, expected: &str) -> Result<(), CoreError> {
    let got = headers.get("X-Internal-Token").and_then(|v| v.to_str().ok());
    if got == Some(expected) {
        Ok(())
    } else {
        Err(CoreError::new(ErrorKind::Unauthenticated, "missing or invalid X-Internal-Token"))
    }
}

/// `ref_type` must be a value owned by this crate, never caller-supplied
/// free text, so it can flow into the ledger's `reason`/`ref_type` columns.
fn static_ref_type(ref_type: &str) -> &'static str {
    match ref_type {
        "withdraw" => "withdraw",
        "deposit" => "deposit",
        "trade" => "trade",
        _ => "other",
    }
}

async fn freeze(State(state): State<RpcState>, headers: HeaderMap, Json(req): Json<InternalRpcRequest>) -> Response {
    handle(state, headers, req, |svc, effect| Box::pin(async move { svc.freeze(effect).await })).await
}

async fn unfreeze(State(state): State<RpcState>, headers: HeaderMap, Json(req): Json<InternalRpcRequest>) -> Response {
    handle(state, headers, req, |svc, effect| Box::pin(async move { svc.unfreeze(effect).await })).await
}

async fn deduct(State(state): State<RpcState>, headers: HeaderMap, Json(req): Json<InternalRpcRequest>) -> Response {
    handle(state, headers, req, |svc, effect| Box::pin(async move { svc.deduct(effect).await })).await
}

async fn credit(State(state): State<RpcState>, headers: HeaderMap, Json(req): Json<InternalRpcRequest>) -> Response {
    handle(state, headers, req, |svc, effect| Box::pin(async move { svc.credit(effect).await })).await
}

type EffectFuture<'a> = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Balance, CoreError>> + Send + 'a>>;

async fn handle(
    state: RpcState,
    headers: HeaderMap,
    req: InternalRpcRequest,
    call: impl FnOnce(&ClearingService, EffectRequest) -> EffectFuture<'_>,
) -> Response {
    if let Err(err) = check_token(&headers, &state.internal_token) {
        return err.into_response();
    }

    let ref_type = static_ref_type(&req.ref_type);
    let effect = EffectRequest {
        idempotency_key: req.idempotency_key,
        user_id: req.user_id,
        asset: req.asset,
        amount: req.amount,
        ref_type,
        ref_id: req.ref_id,
    };

    match call(&state.clearing, effect).await {
        Ok(balance) => Json(InternalRpcResponse {
            success: true,
            error_code: None,
            balance: Some(BalanceView { available: balance.available(), frozen: balance.frozen() }),
        })
        .into_response(),
        Err(err) => {
            let status = err.kind.http_status();
            let body = InternalRpcResponse { success: false, error_code: Some(err.kind.tag()), balance: None };
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ref_type_maps_to_other() {
        assert_eq!(static_ref_type("bogus"), "other");
        assert_eq!(static_ref_type("withdraw"), "withdraw");
    }

    #[test]
    fn missing_token_is_rejected() {
        let headers = HeaderMap::new();
        let err = check_token(&headers, "secret").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }
}
