//! REST surface exposed to the administration UI.
//!
//! Transport only: every handler resolves the caller's session through the
//! authentication guard, delegates to the engine, and maps `EngineError`
//! variants to HTTP statuses. No business rules live here.

use crate::application::approvals::ApprovalQueue;
use crate::application::engine::AuthorizationEngine;
use crate::application::guard::AuthenticationGuard;
use crate::domain::approval::ApprovalRequest;
use crate::domain::session::{AuthStep, Capability};
use crate::domain::transaction::{
    AuthorizationDecision, PaymentMethod, TransactionGeo, TransactionRequest,
};
use crate::error::EngineError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthorizationEngine>,
    pub queue: Arc<ApprovalQueue>,
    pub guard: Arc<AuthenticationGuard>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id/2fa", post(submit_second_factor))
        .route("/cards/:id/authorize", post(authorize))
        .route("/approvals", get(list_approvals))
        .route("/approvals/:id/approve", post(approve))
        .route("/approvals/:id/reject", post(reject))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateSessionBody {
    user_id: String,
    password: String,
}

#[derive(Deserialize)]
struct SecondFactorBody {
    code: String,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: Uuid,
    step: AuthStep,
}

#[derive(Deserialize)]
struct AuthorizeBody {
    amount: rust_decimal::Decimal,
    currency: String,
    category: String,
    merchant: String,
    geo: TransactionGeo,
    payment_method: PaymentMethod,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ApproveBody {
    notes: Option<String>,
}

#[derive(Deserialize)]
struct RejectBody {
    reason: String,
}

#[derive(Deserialize)]
struct ApprovalsQuery {
    status: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    let now = Utc::now();
    let session = state.guard.begin(&body.user_id, now);
    let step = state
        .guard
        .submit_password(session.id, &body.password, now)
        .await?;
    Ok(Json(SessionResponse {
        session_id: session.id,
        step,
    }))
}

async fn submit_second_factor(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SecondFactorBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    let now = Utc::now();
    let step = state
        .guard
        .submit_second_factor(session_id, &body.code, now)
        .await?;
    Ok(Json(SessionResponse { session_id, step }))
}

async fn authorize(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AuthorizeBody>,
) -> Result<Json<AuthorizationDecision>, ApiError> {
    let now = Utc::now();
    let session_id = bearer_session(&headers)?;
    let session = state
        .guard
        .require_capability(session_id, Capability::AuthorizePayments, now)?;

    let request = TransactionRequest {
        card_id,
        amount: body.amount.try_into()?,
        currency: body.currency,
        category: body.category,
        merchant: body.merchant,
        geo: body.geo,
        timestamp: body.timestamp.unwrap_or(now),
        payment_method: body.payment_method,
    };
    let decision = state.engine.authorize(request, &session.user_id, now).await?;
    Ok(Json(decision))
}

async fn list_approvals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ApprovalsQuery>,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    let now = Utc::now();
    let session_id = bearer_session(&headers)?;
    state.guard.authenticated(session_id, now)?;

    match query.status.as_deref().unwrap_or("pending") {
        "pending" => Ok(Json(state.queue.list_pending(now).await?)),
        other => Err(EngineError::Validation(format!("unsupported status filter: {other}")).into()),
    }
}

async fn approve(
    State(state): State<AppState>,
    Path(approval_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ApproveBody>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let session_id = bearer_session(&headers)?;
    let session = state.guard.authenticated(session_id, now)?;

    let resolution = state
        .queue
        .approve(approval_id, &session.approver(), body.notes, now)
        .await?;
    Ok(Json(resolution).into_response())
}

async fn reject(
    State(state): State<AppState>,
    Path(approval_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let session_id = bearer_session(&headers)?;
    let session = state.guard.authenticated(session_id, now)?;

    let resolution = state
        .queue
        .reject(approval_id, &session.approver(), &body.reason, now)
        .await?;
    Ok(Json(resolution).into_response())
}

/// Session token from the `Authorization: Bearer` header.
fn bearer_session(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| Uuid::parse_str(token.trim()).ok())
        .ok_or_else(|| EngineError::Unauthenticated.into())
}

/// Wraps `EngineError` so business failures map onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidCredentials
            | EngineError::SessionNotFound
            | EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::MissingCapability(_) | EngineError::UnauthorizedApprover(_) => {
                StatusCode::FORBIDDEN
            }
            EngineError::CardNotFound(_) | EngineError::ApprovalNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            EngineError::ApprovalAlreadyResolved(_) | EngineError::ReservationExpired => {
                StatusCode::CONFLICT
            }
            EngineError::ApprovalExpired => StatusCode::GONE,
            EngineError::AccountLocked { .. } => StatusCode::LOCKED,
            EngineError::InsufficientFunds
            | EngineError::DailyLimitExceeded
            | EngineError::MonthlyLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }

        let mut body = json!({
            "error": error_code(&self.0),
            "message": self.0.to_string(),
        });
        if let EngineError::AccountLocked { remaining_secs } = &self.0 {
            body["retry_after_secs"] = json!(remaining_secs);
        }
        (status, Json(body)).into_response()
    }
}

fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::CardNotFound(_) => "card_not_found",
        EngineError::InsufficientFunds => "insufficient_funds",
        EngineError::DailyLimitExceeded => "daily_limit_exceeded",
        EngineError::MonthlyLimitExceeded => "monthly_limit_exceeded",
        EngineError::ReservationExpired => "reservation_expired",
        EngineError::ApprovalNotFound(_) => "approval_not_found",
        EngineError::ApprovalExpired => "approval_expired",
        EngineError::ApprovalAlreadyResolved(_) => "approval_already_resolved",
        EngineError::UnauthorizedApprover(_) => "unauthorized_approver",
        EngineError::AccountLocked { .. } => "account_locked",
        EngineError::InvalidCredentials => "invalid_credentials",
        EngineError::SessionNotFound => "session_not_found",
        EngineError::Unauthenticated => "unauthenticated",
        EngineError::MissingCapability(_) => "missing_capability",
        EngineError::Internal(_) => "internal",
    }
}
