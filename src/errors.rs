//! Wire-stable error kinds shared by the clearing RPC, the withdraw RPC, and
//! the matching command validator.
//!
//! `ErrorKind` is what a caller outside this process ever sees; it is kept
//! deliberately small and stable across releases. Anything that doesn't map
//! cleanly onto one of these tags collapses to `Internal` at the boundary —
//! the detailed cause stays in the trace logs, never on the wire.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParam,
    InvalidRequest,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Conflict,
    InsufficientBalance,
    /// Internal only: a duplicate `idempotency_key` was observed. Never
    /// serialized — callers see success instead, see `CoreError::is_idempotent_replay`.
    IdempotencyConflict,
    /// Internal only: optimistic-lock CAS lost the race. Retried internally
    /// up to the bound in `clearing::service`; never reaches the wire.
    OptimisticLockFailed,
    InvalidWithdrawState,
    NetworkNotFound,
    DepositDisabled,
    RequestTooLarge,
    RateLimited,
    Internal,
}

impl ErrorKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::InvalidParam => "INVALID_PARAM",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::OptimisticLockFailed => "OPTIMISTIC_LOCK_FAILED",
            Self::InvalidWithdrawState => "INVALID_WITHDRAW_STATE",
            Self::NetworkNotFound => "NETWORK_NOT_FOUND",
            Self::DepositDisabled => "DEPOSIT_DISABLED",
            Self::RequestTooLarge => "REQUEST_TOO_LARGE",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidParam | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound | Self::NetworkNotFound => StatusCode::NOT_FOUND,
            Self::Conflict
            | Self::InvalidWithdrawState
            | Self::IdempotencyConflict
            | Self::OptimisticLockFailed => StatusCode::CONFLICT,
            Self::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DepositDisabled => StatusCode::FORBIDDEN,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn insufficient_balance() -> Self {
        Self::new(ErrorKind::InsufficientBalance, "insufficient balance")
    }

    pub fn optimistic_lock_failed() -> Self {
        Self::new(ErrorKind::OptimisticLockFailed, "balance version changed concurrently")
    }

    pub fn idempotency_conflict() -> Self {
        Self::new(ErrorKind::IdempotencyConflict, "idempotency key already applied")
    }

    pub fn invalid_withdraw_state(from: &str, op: &str) -> Self {
        Self::new(ErrorKind::InvalidWithdrawState, format!("cannot {op} a withdrawal in state {from}"))
    }

    /// `OptimisticLockFailed` is retried internally and never escapes a
    /// correctly-behaving caller; this is the retry-budget exhaustion path.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::OptimisticLockFailed
    }

    /// `IdempotencyConflict` is mapped to a successful response by the
    /// clearing service before it would otherwise reach a caller.
    pub fn is_idempotent_replay(&self) -> bool {
        self.kind == ErrorKind::IdempotencyConflict
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::new(ErrorKind::Internal, err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { error: self.kind.tag(), message: self.message };
        (self.kind.http_status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_conflict_never_reaches_wire_as_error() {
        let err = CoreError::idempotency_conflict();
        assert!(err.is_idempotent_replay());
        assert!(!err.is_retryable());
    }

    #[test]
    fn optimistic_lock_is_retryable_not_replay() {
        let err = CoreError::optimistic_lock_failed();
        assert!(err.is_retryable());
        assert!(!err.is_idempotent_replay());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorKind::InsufficientBalance.http_status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorKind::RateLimited.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
