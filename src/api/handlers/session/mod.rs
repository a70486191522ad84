//! Login and session endpoints: OTP login, PIN login, logout, refresh,
//! and token verification.

pub(crate) mod storage;
pub mod types;

use axum::{Json, extract::Extension, http::HeaderMap};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::state::AppContext;
use crate::auth::{jwt, pin, tokens::sha256_hex};
use crate::otp::{OtpIssue, OtpScope};
use crate::rate_limit::{FailureOutcome, active_lockout, clear_login_failures, record_login_failure};
use crate::validators::normalize_mobile;

use super::users::{self, UserRecord};
use storage::{SessionOptions, issue_session};
use types::{
    AuthResponse, PinLoginRequest, RefreshTokenRequest, RequestLoginOtpRequest,
    OtpIssuedResponse, StatusResponse, UserSummary, VerifyLoginOtpRequest,
    VerifyTokenResponse,
};

pub(crate) fn user_summary(user: &UserRecord) -> UserSummary {
    UserSummary {
        user_id: user.id,
        user_type: user.role,
        phone: user.phone.clone(),
        email: user.email.clone(),
        full_name: user.full_name.clone(),
        language: user.language.clone(),
    }
}

/// Interpret a failed OTP/PIN verification: count it, and surface either the
/// attempts left or the freshly tripped lockout.
pub(crate) async fn verification_failure(
    ctx: &AppContext,
    phone: &str,
    code: ErrorCode,
    message: &str,
) -> ApiError {
    match record_login_failure(ctx.kv(), phone).await {
        Ok(FailureOutcome::Counted { remaining_attempts }) => {
            ApiError::new(code, message).with_remaining_attempts(remaining_attempts)
        }
        Ok(FailureOutcome::Locked { locked_until }) => {
            ApiError::new(ErrorCode::AccountLocked, "Too many failed attempts, account locked")
                .with_remaining_attempts(0)
                .with_locked_until(locked_until)
        }
        Err(err) => ApiError::internal(err),
    }
}

/// Reject callers whose phone is under an active lockout.
pub(crate) async fn ensure_not_locked(ctx: &AppContext, phone: &str) -> Result<(), ApiError> {
    if let Some(locked_until) = active_lockout(ctx.kv(), phone)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(
            ApiError::new(ErrorCode::AccountLocked, "Account temporarily locked")
                .with_locked_until(locked_until),
        );
    }
    Ok(())
}

/// Resolve a login-capable user by phone, honouring the database-resident
/// lockout and the active flag.
pub(crate) async fn login_user_by_phone(
    pool: &PgPool,
    phone: &str,
) -> Result<UserRecord, ApiError> {
    let user = users::find_user_by_phone(pool, phone)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::PhoneNotRegistered, "Phone number is not registered")
        })?;
    if !user.is_active {
        return Err(ApiError::new(ErrorCode::Unauthorized, "Account is deactivated"));
    }
    if let Some(locked_until) = user.locked_until
        && locked_until > Utc::now()
    {
        return Err(
            ApiError::new(ErrorCode::AccountLocked, "Account temporarily locked")
                .with_locked_until(locked_until),
        );
    }
    Ok(user)
}

/// Shared phone + PIN authentication used by `Login` and `LoginWithPin`.
pub(crate) async fn pin_login(
    pool: &PgPool,
    ctx: &AppContext,
    headers: &HeaderMap,
    phone_raw: &str,
    pin_value: &str,
    device_id: Option<String>,
) -> Result<AuthResponse, ApiError> {
    let phone = normalize_mobile(phone_raw)?;
    ensure_not_locked(ctx, &phone).await?;
    let user = login_user_by_phone(pool, &phone).await?;

    let Some(pin_hash) = user.pin_hash.as_deref() else {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "No PIN set for this account",
        ));
    };
    if !pin::verify_pin(pin_value, pin_hash) {
        return Err(verification_failure(ctx, &phone, ErrorCode::InvalidPin, "Invalid PIN").await);
    }

    clear_login_failures(ctx.kv(), &phone)
        .await
        .map_err(ApiError::internal)?;

    let options = SessionOptions::single_device(device_id).with_client(
        super::extract_client_ip(headers),
        super::extract_user_agent(headers),
    );
    let pair = issue_session(pool, ctx.jwt_secret(), user.id, user.role, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(pool, user.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        user: user_summary(&user),
    })
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/otp/request",
    request_body = RequestLoginOtpRequest,
    responses(
        (status = 200, description = "OTP issued", body = OtpIssuedResponse),
        (status = 404, description = "Phone not registered", body = ApiError),
        (status = 429, description = "Too many OTP requests", body = ApiError)
    ),
    tag = "session"
)]
pub async fn request_login_otp(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<RequestLoginOtpRequest>,
) -> Result<Json<OtpIssuedResponse>, ApiError> {
    let phone = normalize_mobile(&request.phone)?;
    let user = login_user_by_phone(&pool, &phone).await?;

    match ctx
        .otp()
        .generate(OtpScope::for_role(user.role), &phone)
        .await
        .map_err(ApiError::internal)?
    {
        OtpIssue::Issued { code, sent } => {
            // Development visibility only; the code never enters a response.
            debug!(%phone, otp = %code, sent, user_id = user.id, "login otp issued");
            Ok(Json(OtpIssuedResponse {
                success: true,
                message: "OTP sent".to_string(),
                expires_in: crate::otp::OTP_TTL_SECONDS,
            }))
        }
        OtpIssue::RateLimited => Err(ApiError::new(
            ErrorCode::RateExceeded,
            "Too many OTP requests, try again later",
        )),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/otp/verify",
    request_body = VerifyLoginOtpRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid OTP", body = ApiError),
        (status = 403, description = "Account locked", body = ApiError)
    ),
    tag = "session"
)]
pub async fn verify_login_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<VerifyLoginOtpRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let phone = normalize_mobile(&request.phone)?;
    ensure_not_locked(&ctx, &phone).await?;
    let user = login_user_by_phone(&pool, &phone).await?;

    let matched = ctx
        .otp()
        .verify(OtpScope::for_role(user.role), &phone, &request.otp)
        .await
        .map_err(ApiError::internal)?;
    if !matched {
        return Err(
            verification_failure(&ctx, &phone, ErrorCode::InvalidOtp, "Invalid or expired OTP")
                .await,
        );
    }

    clear_login_failures(ctx.kv(), &phone)
        .await
        .map_err(ApiError::internal)?;

    let options = SessionOptions::single_device(request.device_id).with_client(
        super::extract_client_ip(&headers),
        super::extract_user_agent(&headers),
    );
    let pair = issue_session(&pool, ctx.jwt_secret(), user.id, user.role, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, user.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        user: user_summary(&user),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = PinLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid PIN", body = ApiError),
        (status = 403, description = "Account locked", body = ApiError),
        (status = 404, description = "Phone not registered", body = ApiError)
    ),
    tag = "session"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<PinLoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let response = pin_login(
        &pool,
        &ctx,
        &headers,
        &request.phone,
        &request.pin,
        request.device_id,
    )
    .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = StatusResponse)
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<StatusResponse>, ApiError> {
    if let Some(token) = super::extract_bearer_token(&headers) {
        storage::soft_delete_by_hash(&pool, &sha256_hex(&token))
            .await
            .map_err(ApiError::internal)?;
    }
    Ok(Json(StatusResponse {
        success: true,
        message: "Logged out".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair issued", body = AuthResponse),
        (status = 412, description = "Refresh token expired or already rotated", body = ApiError)
    ),
    tag = "session"
)]
pub async fn refresh_token(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let rotated = storage::consume_refresh(&pool, &request.refresh_token)
        .await
        .map_err(ApiError::internal)?;
    let Some((user_id, role)) = rotated else {
        return Err(ApiError::new(
            ErrorCode::TokenExpired,
            "Refresh token is expired or no longer valid",
        ));
    };

    let user = users::find_user_by_id(&pool, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::TokenExpired, "Account no longer exists"))?;

    // Rebuild the organization binding for buyer tokens.
    let buyer_org_id = if role == crate::auth::Role::Buyer {
        super::buyer::storage::buyer_org_for_user(&pool, user_id)
            .await
            .map_err(ApiError::internal)?
    } else {
        None
    };
    let pair = issue_session(
        &pool,
        ctx.jwt_secret(),
        user_id,
        role,
        SessionOptions::multi_device().with_buyer_org(buyer_org_id),
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Token refreshed".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        user: user_summary(&user),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify",
    responses(
        (status = 200, description = "Verification result", body = VerifyTokenResponse)
    ),
    tag = "session"
)]
pub async fn verify_token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
) -> Result<Json<VerifyTokenResponse>, ApiError> {
    let invalid = VerifyTokenResponse {
        valid: false,
        user_id: None,
        user_type: None,
    };

    let Some(token) = super::extract_bearer_token(&headers) else {
        return Ok(Json(invalid));
    };
    let Ok(claims) = jwt::verify_hs256(&token, ctx.jwt_secret(), Utc::now().timestamp()) else {
        return Ok(Json(invalid));
    };
    let active = storage::session_is_active(&pool, &sha256_hex(&token))
        .await
        .map_err(ApiError::internal)?;
    if !active {
        return Ok(Json(invalid));
    }

    Ok(Json(VerifyTokenResponse {
        valid: true,
        user_id: Some(claims.user_id),
        user_type: Some(claims.user_type),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::test_support::memory_context;
    use anyhow::Result;
    use axum::http::HeaderValue;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn login_rejects_malformed_phone_before_touching_storage() -> Result<()> {
        let pool = lazy_pool()?;
        let ctx = memory_context();
        let result = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(ctx),
            Json(PinLoginRequest {
                phone: "12345".to_string(),
                pin: "4827".to_string(),
                device_id: None,
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn verify_token_without_bearer_is_invalid_not_error() -> Result<()> {
        let pool = lazy_pool()?;
        let ctx = memory_context();
        let response = verify_token(HeaderMap::new(), Extension(pool), Extension(ctx)).await?;
        assert!(!response.0.valid);
        Ok(())
    }

    #[tokio::test]
    async fn verify_token_with_garbage_bearer_is_invalid() -> Result<()> {
        let pool = lazy_pool()?;
        let ctx = memory_context();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-jwt"),
        );
        let response = verify_token(headers, Extension(pool), Extension(ctx)).await?;
        assert!(!response.0.valid);
        Ok(())
    }

    #[tokio::test]
    async fn lockout_short_circuits_before_user_lookup() -> Result<()> {
        let pool = lazy_pool()?;
        let ctx = memory_context();
        let phone = "9876543210";
        // Trip the lockout through the engine itself.
        for _ in 0..3 {
            let _ = record_login_failure(ctx.kv(), phone).await?;
        }
        let result = verify_login_otp(
            HeaderMap::new(),
            Extension(pool),
            Extension(ctx),
            Json(VerifyLoginOtpRequest {
                phone: phone.to_string(),
                otp: "000000".to_string(),
                device_id: None,
            }),
        )
        .await;
        let err = result.err().expect("must be locked");
        assert_eq!(err.code, ErrorCode::AccountLocked);
        assert!(err.locked_until.is_some());
        Ok(())
    }
}
