//! Error envelope for the RPC façade.
//!
//! Domain services raise typed failures; handlers translate them into this
//! envelope, which owns the machine-code -> HTTP status mapping. The body
//! always carries `success=false`, the machine `code`, the canonical status
//! name, and a human-readable message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    WeakPassword,
    InvalidOtp,
    InvalidPin,
    InvalidCredentials,
    PinExpired,
    AccountLocked,
    PhoneNotRegistered,
    EmailExists,
    PhoneExists,
    DuplicateVehicleNumber,
    DuplicateEmail,
    InvitationExpired,
    TokenExpired,
    AlreadyAccepted,
    Unauthorized,
    LastAdmin,
    SelfAction,
    RateExceeded,
    RegistrationNotFound,
    InvalidState,
    InvalidUpi,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidArgument | Self::WeakPassword | Self::SelfAction | Self::InvalidUpi => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidOtp | Self::InvalidPin | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountLocked | Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::PhoneNotRegistered | Self::RegistrationNotFound => StatusCode::NOT_FOUND,
            Self::EmailExists
            | Self::PhoneExists
            | Self::DuplicateVehicleNumber
            | Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::PinExpired
            | Self::InvitationExpired
            | Self::TokenExpired
            | Self::AlreadyAccepted
            | Self::LastAdmin
            | Self::InvalidState => StatusCode::PRECONDITION_FAILED,
            Self::RateExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Canonical status name carried alongside the machine code.
    #[must_use]
    pub const fn canonical_status(self) -> &'static str {
        match self {
            Self::InvalidArgument | Self::WeakPassword | Self::SelfAction | Self::InvalidUpi => {
                "INVALID_ARGUMENT"
            }
            Self::InvalidOtp | Self::InvalidPin | Self::InvalidCredentials => "UNAUTHENTICATED",
            Self::AccountLocked | Self::Unauthorized => "PERMISSION_DENIED",
            Self::PhoneNotRegistered | Self::RegistrationNotFound => "NOT_FOUND",
            Self::EmailExists
            | Self::PhoneExists
            | Self::DuplicateVehicleNumber
            | Self::DuplicateEmail => "ALREADY_EXISTS",
            Self::PinExpired
            | Self::InvitationExpired
            | Self::TokenExpired
            | Self::AlreadyAccepted
            | Self::LastAdmin
            | Self::InvalidState => "FAILED_PRECONDITION",
            Self::RateExceeded => "RESOURCE_EXHAUSTED",
            Self::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    success: bool,
    pub code: ErrorCode,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_rules: Option<Vec<String>>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            status: code.canonical_status(),
            message: message.into(),
            reason: None,
            remaining_attempts: None,
            locked_until: None,
            failed_rules: None,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// Log the underlying fault and return the opaque internal envelope.
    #[must_use]
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!("internal error: {err}");
        Self::new(ErrorCode::Internal, "Something went wrong, please retry")
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_remaining_attempts(mut self, remaining: u32) -> Self {
        self.remaining_attempts = Some(remaining);
        self
    }

    #[must_use]
    pub fn with_locked_until(mut self, locked_until: DateTime<Utc>) -> Self {
        self.locked_until = Some(locked_until);
        self
    }

    #[must_use]
    pub fn with_failed_rules(mut self, rules: Vec<String>) -> Self {
        self.failed_rules = Some(rules);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<crate::validators::FieldError> for ApiError {
    fn from(err: crate::validators::FieldError) -> Self {
        Self::invalid(err.message)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_canonical() {
        assert_eq!(ErrorCode::RateExceeded.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::RateExceeded.canonical_status(), "RESOURCE_EXHAUSTED");
        assert_eq!(ErrorCode::AccountLocked.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::AccountLocked.canonical_status(), "PERMISSION_DENIED");
        assert_eq!(ErrorCode::InvalidOtp.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::LastAdmin.canonical_status(), "FAILED_PRECONDITION");
        assert_eq!(ErrorCode::DuplicateEmail.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::SelfAction.canonical_status(), "INVALID_ARGUMENT");
    }

    #[test]
    fn envelope_serializes_optional_fields_only_when_set() -> anyhow::Result<()> {
        let err = ApiError::new(ErrorCode::InvalidOtp, "Invalid OTP").with_remaining_attempts(2);
        let value = serde_json::to_value(&err)?;
        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "INVALID_OTP");
        assert_eq!(value["status"], "UNAUTHENTICATED");
        assert_eq!(value["remainingAttempts"], 2);
        assert!(value.get("lockedUntil").is_none());
        assert!(value.get("failedRules").is_none());
        Ok(())
    }

    #[test]
    fn pin_reason_is_exposed() -> anyhow::Result<()> {
        let err = ApiError::invalid("PIN must not be a sequential pattern")
            .with_reason("SEQUENTIAL");
        let value = serde_json::to_value(&err)?;
        assert_eq!(value["reason"], "SEQUENTIAL");
        Ok(())
    }
}
