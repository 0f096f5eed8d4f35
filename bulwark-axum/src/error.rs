use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bulwark::{BulwarkError, LoginOutcome, RateLimitDecision, seconds_until};
use chrono::Utc;
use thiserror::Error;

use crate::types::ErrorResponse;

const GENERIC_FAILURE: &str = "Invalid username or password";
const RATE_LIMITED: &str = "Too many requests. Please try again later.";

/// A request bulwark refused, ready to be returned from a handler.
///
/// Login throttling and bad credentials share one public message; only a
/// durable account lock shows its detail. Requests refused by the generic
/// limiter get [`LoginRejection::RateLimited`], which says nothing about
/// credentials.
#[derive(Debug, Error)]
pub enum LoginRejection {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many attempts, retry in {retry_after_seconds}s")]
    Throttled { retry_after_seconds: i64 },

    #[error("Rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    #[error("Account locked: {message}")]
    Locked {
        message: String,
        retry_after_seconds: Option<i64>,
    },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl LoginRejection {
    /// The rejection for a login outcome, or `None` on success.
    pub fn from_outcome(outcome: &LoginOutcome) -> Option<Self> {
        match outcome {
            LoginOutcome::Success(_) => None,
            LoginOutcome::InvalidCredentials { .. } => Some(LoginRejection::InvalidCredentials),
            LoginOutcome::Throttled {
                retry_after_seconds,
                ..
            } => Some(LoginRejection::Throttled {
                retry_after_seconds: *retry_after_seconds,
            }),
            LoginOutcome::Locked {
                message,
                locked_until,
            } => Some(LoginRejection::Locked {
                message: message.clone(),
                retry_after_seconds: locked_until.map(|until| seconds_until(until, Utc::now())),
            }),
        }
    }

    /// The rejection for a denied rate-limit decision, or `None` if allowed.
    pub fn from_decision(decision: &RateLimitDecision) -> Option<Self> {
        (!decision.allowed).then(|| LoginRejection::RateLimited {
            retry_after_seconds: decision.retry_after_seconds.unwrap_or_default(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LoginRejection::InvalidCredentials => StatusCode::UNAUTHORIZED,
            LoginRejection::Throttled { .. } | LoginRejection::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            LoginRejection::Locked { .. } => StatusCode::LOCKED,
            LoginRejection::BadRequest(_) => StatusCode::BAD_REQUEST,
            LoginRejection::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after(&self) -> Option<i64> {
        match self {
            LoginRejection::Throttled {
                retry_after_seconds,
            }
            | LoginRejection::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            LoginRejection::Locked {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

impl From<BulwarkError> for LoginRejection {
    fn from(err: BulwarkError) -> Self {
        if err.is_validation_error() {
            return LoginRejection::BadRequest(err.to_string());
        }

        tracing::error!(error = %err, "Authentication defense failed");
        LoginRejection::InternalError("Internal server error".to_string())
    }
}

impl IntoResponse for LoginRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();

        let error = match self {
            LoginRejection::InvalidCredentials | LoginRejection::Throttled { .. } => {
                GENERIC_FAILURE.to_string()
            }
            LoginRejection::RateLimited { .. } => RATE_LIMITED.to_string(),
            LoginRejection::Locked { message, .. } => message,
            LoginRejection::BadRequest(msg) => msg,
            LoginRejection::InternalError(msg) => msg,
        };

        let body = Json(ErrorResponse {
            error,
            code: status.as_u16(),
            retry_after_seconds: retry_after,
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(0)));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, LoginRejection>;
