//! User-facing withdraw request endpoint plus the admin transition
//! endpoints used by the back-office approval flow. Admin routes are
//! expected to sit behind the same operator auth as the rest of the back
//! office; this module only encodes the FSM calls, not that auth layer.

use super::service::{WithdrawRecord, WithdrawRequest, WithdrawService};
use crate::core_types::{AssetId, UserId};
use crate::errors::CoreError;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct WithdrawRpcState {
    pub service: Arc<WithdrawService>,
}

pub fn router(state: WithdrawRpcState) -> Router {
    Router::new()
        .route("/wallet/withdraw", post(request_withdraw))
        .route("/internal/withdraw/{id}/approve", post(approve))
        .route("/internal/withdraw/{id}/reject", post(reject))
        .route("/internal/withdraw/{id}/mark_processing", post(mark_processing))
        .route("/internal/withdraw/{id}/complete", post(complete))
        .route("/internal/withdraw/{id}/fail", post(fail))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequestBody {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub asset: AssetId,
    pub amount: i64,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawView {
    pub id: i64,
    pub state: String,
    pub amount: i64,
}

impl From<WithdrawRecord> for WithdrawView {
    fn from(record: WithdrawRecord) -> Self {
        WithdrawView { id: record.id, state: record.state.to_string(), amount: record.amount }
    }
}

async fn request_withdraw(State(state): State<WithdrawRpcState>, Json(body): Json<WithdrawRequestBody>) -> Response {
    let req = WithdrawRequest {
        idempotency_key: body.idempotency_key,
        user_id: body.user_id,
        asset: body.asset,
        amount: body.amount,
        address: body.address,
    };
    respond(state.service.request(req).await)
}

#[derive(Debug, Deserialize)]
pub struct ApproverBody {
    pub approver_id: UserId,
}

async fn approve(State(state): State<WithdrawRpcState>, Path(id): Path<i64>, Json(body): Json<ApproverBody>) -> Response {
    respond(state.service.approve(id, body.approver_id).await)
}

async fn reject(State(state): State<WithdrawRpcState>, Path(id): Path<i64>, Json(body): Json<ApproverBody>) -> Response {
    respond(state.service.reject(id, body.approver_id).await)
}

async fn mark_processing(State(state): State<WithdrawRpcState>, Path(id): Path<i64>) -> Response {
    respond(state.service.mark_processing(id).await)
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub tx_id: String,
}

async fn complete(State(state): State<WithdrawRpcState>, Path(id): Path<i64>, Json(body): Json<CompleteBody>) -> Response {
    respond(state.service.complete(id, body.tx_id).await)
}

async fn fail(State(state): State<WithdrawRpcState>, Path(id): Path<i64>) -> Response {
    respond(state.service.fail(id).await)
}

fn respond(result: Result<WithdrawRecord, CoreError>) -> Response {
    match result {
        Ok(record) => Json(WithdrawView::from(record)).into_response(),
        Err(err) => err.into_response(),
    }
}
