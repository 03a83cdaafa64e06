use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("You've reached your monthly searches for your current plan.")]
    PlanLimit,
    #[error("Deep Mode requires Pro subscription.")]
    PlanRestriction,
    #[error("We hit the external data quota. Try again later or use Fast Mode.")]
    SerpQuota,
    #[error("Analysis took too long. Try Fast Mode or fewer keywords.")]
    Timeout,
    #[error("upstream service returned {status}")]
    Upstream { status: u16, detail: String },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("payment gateway error: {0}")]
    Payment(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Envelope every failed request is rendered as. `error` is a stable kind the dashboard
/// branches on.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::PlanLimit => "plan_limit",
            AppError::PlanRestriction => "plan_restriction",
            AppError::SerpQuota => "serp_quota",
            AppError::Timeout => "timeout",
            AppError::Upstream { .. } => "upstream_error",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Payment(_) => "payment_error",
            AppError::Db(_) | AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidSignature | AppError::Payment(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PlanLimit => StatusCode::PAYMENT_REQUIRED,
            AppError::PlanRestriction => StatusCode::FORBIDDEN,
            AppError::SerpQuota => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::Db(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            AppError::Db(_) | AppError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let detail = match self {
            AppError::Upstream { detail, .. } => Some(detail.clone()),
            _ => None,
        };
        ErrorEnvelope {
            error: self.kind(),
            message,
            status: self.status().as_u16(),
            detail,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(kind = self.kind(), %status, "request rejected");
        }
        (status, Json(self.envelope())).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
