//! Buyer onboarding and login.
//!
//! Registration is two-phase: `RegisterBuyer` validates everything, parks the
//! bundle in the key-value store, and issues an OTP; `VerifyBuyerOtp` turns
//! the bundle into the user, profile, and founding admin membership in one
//! transaction. Buyers authenticate with email/password and are tracked by
//! the row-resident failure counter.

pub(crate) mod storage;
pub mod types;

use axum::{Json, extract::Extension, http::HeaderMap};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::sms::{SmsMessage, send_best_effort};
use crate::api::state::AppContext;
use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::auth::tokens::generate_token;
use crate::kv::{buyer_email_reservation_key, buyer_registration_key};
use crate::otp::{OtpIssue, OtpScope};
use crate::validators::{
    BusinessType, normalize_email, normalize_gst, normalize_mobile, normalize_person_name,
};

use super::session::storage::{SessionOptions, issue_session, soft_delete_by_hash};
use super::session::types::{StatusResponse, UserSummary};
use super::users;
use super::{extract_bearer_token, extract_client_ip, extract_user_agent};
use storage::{BuyerAddress, DbFailureOutcome, FinalizeOutcome, ResetOutcome};
use types::{
    BuyerAuthResponse, ForgotPasswordRequest, LoginBuyerRequest, PendingBuyerRegistration,
    RegisterBuyerRequest, RegisterBuyerResponse, ResetPasswordRequest, VerifyBuyerOtpRequest,
};

const REGISTRATION_TTL: std::time::Duration = std::time::Duration::from_secs(600);

fn weak_password_error(failed_rules: Vec<&'static str>) -> ApiError {
    ApiError::new(ErrorCode::WeakPassword, "Password does not meet the policy")
        .with_failed_rules(failed_rules.into_iter().map(str::to_string).collect())
}

#[utoipa::path(
    post,
    path = "/v1/buyer/register",
    request_body = RegisterBuyerRequest,
    responses(
        (status = 200, description = "OTP issued for verification", body = RegisterBuyerResponse),
        (status = 400, description = "Validation failure", body = ApiError),
        (status = 409, description = "Email or phone already registered", body = ApiError),
        (status = 429, description = "Too many OTP requests", body = ApiError)
    ),
    tag = "buyer"
)]
pub async fn register_buyer(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<RegisterBuyerRequest>,
) -> Result<Json<RegisterBuyerResponse>, ApiError> {
    let email = normalize_email(&request.email)?;
    let phone = normalize_mobile(&request.phone)?;
    let full_name = normalize_person_name(&request.full_name)?;
    let business_type = BusinessType::parse(&request.business_type)?;
    if request.business_name.trim().is_empty() {
        return Err(ApiError::invalid("Business name is required"));
    }
    let gst_number = request
        .gst_number
        .as_deref()
        .filter(|gst| !gst.trim().is_empty())
        .map(normalize_gst)
        .transpose()?;

    let policy = validate_password(&request.password);
    if !policy.is_acceptable() {
        return Err(weak_password_error(policy.failed_rules));
    }

    if users::email_exists(&pool, &email)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(ErrorCode::EmailExists, "Email is already registered"));
    }
    if users::phone_exists(&pool, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(
            ErrorCode::PhoneExists,
            "Phone number is already registered",
        ));
    }

    // Reservation makes the register/register race lose deterministically:
    // only one pending registration may hold an email at a time.
    let reserved = ctx
        .kv()
        .set_nx_ex(&buyer_email_reservation_key(&email), &phone, REGISTRATION_TTL)
        .await
        .map_err(ApiError::internal)?;
    if !reserved {
        return Err(ApiError::new(
            ErrorCode::EmailExists,
            "Email is already registered",
        ));
    }

    let password_hash = hash_password(&request.password).map_err(ApiError::internal)?;
    let bundle = PendingBuyerRegistration {
        email: email.clone(),
        phone: phone.clone(),
        password_hash,
        full_name,
        business_name: request.business_name.trim().to_string(),
        business_type: business_type.as_str().to_string(),
        gst_number,
    };
    let bundle_json = serde_json::to_string(&bundle).map_err(ApiError::internal)?;
    ctx.kv()
        .set_ex(&buyer_registration_key(&phone), &bundle_json, REGISTRATION_TTL)
        .await
        .map_err(ApiError::internal)?;

    match ctx
        .otp()
        .generate(OtpScope::Buyer, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        OtpIssue::Issued { code, sent } => {
            debug!(%phone, otp = %code, sent, "buyer registration otp issued");
            Ok(Json(RegisterBuyerResponse {
                success: true,
                message: "OTP sent to your mobile number".to_string(),
                expires_in: crate::otp::OTP_TTL_SECONDS,
            }))
        }
        OtpIssue::RateLimited => {
            // Release the reservation; the registration did not reach the OTP stage.
            let _ = ctx.kv().del(&buyer_email_reservation_key(&email)).await;
            let _ = ctx.kv().del(&buyer_registration_key(&phone)).await;
            Err(ApiError::new(
                ErrorCode::RateExceeded,
                "Too many OTP requests, try again later",
            ))
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/buyer/verify-otp",
    request_body = VerifyBuyerOtpRequest,
    responses(
        (status = 200, description = "Account created", body = BuyerAuthResponse),
        (status = 401, description = "Invalid OTP", body = ApiError),
        (status = 404, description = "Registration expired or unknown", body = ApiError)
    ),
    tag = "buyer"
)]
pub async fn verify_buyer_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<VerifyBuyerOtpRequest>,
) -> Result<Json<BuyerAuthResponse>, ApiError> {
    let phone = normalize_mobile(&request.phone)?;
    for (value, label) in [
        (&request.address_line, "Address"),
        (&request.city, "City"),
        (&request.state, "State"),
        (&request.pincode, "Pincode"),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::invalid(format!("{label} is required")));
        }
    }

    let matched = ctx
        .otp()
        .verify(OtpScope::Buyer, &phone, &request.otp)
        .await
        .map_err(ApiError::internal)?;
    if !matched {
        return Err(ApiError::new(ErrorCode::InvalidOtp, "Invalid or expired OTP"));
    }

    let bundle_json = ctx
        .kv()
        .get(&buyer_registration_key(&phone))
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::RegistrationNotFound,
                "Registration expired, please register again",
            )
        })?;
    let bundle: PendingBuyerRegistration =
        serde_json::from_str(&bundle_json).map_err(ApiError::internal)?;

    let address = BuyerAddress {
        address_line: request.address_line.trim(),
        city: request.city.trim(),
        district: request.district.as_deref().map(str::trim),
        state: request.state.trim(),
        pincode: request.pincode.trim(),
    };
    let (user_id, org_id) = match storage::finalize_registration(&pool, &bundle, &address)
        .await
        .map_err(ApiError::internal)?
    {
        FinalizeOutcome::Created { user_id, org_id } => (user_id, org_id),
        FinalizeOutcome::EmailTaken => {
            return Err(ApiError::new(ErrorCode::EmailExists, "Email is already registered"));
        }
        FinalizeOutcome::PhoneTaken => {
            return Err(ApiError::new(
                ErrorCode::PhoneExists,
                "Phone number is already registered",
            ));
        }
    };

    ctx.kv()
        .del(&buyer_registration_key(&phone))
        .await
        .map_err(ApiError::internal)?;
    ctx.kv()
        .del(&buyer_email_reservation_key(&bundle.email))
        .await
        .map_err(ApiError::internal)?;

    let options = SessionOptions::multi_device()
        .with_buyer_org(Some(org_id))
        .with_client(extract_client_ip(&headers), extract_user_agent(&headers));
    let pair = issue_session(&pool, ctx.jwt_secret(), user_id, crate::auth::Role::Buyer, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, user_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(BuyerAuthResponse {
        success: true,
        message: "Account created".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        buyer_org_id: org_id,
        user: UserSummary {
            user_id,
            user_type: crate::auth::Role::Buyer,
            phone: Some(phone),
            email: Some(bundle.email),
            full_name: Some(bundle.full_name),
            language: "en".to_string(),
        },
    }))
}

#[utoipa::path(
    post,
    path = "/v1/buyer/login",
    request_body = LoginBuyerRequest,
    responses(
        (status = 200, description = "Login successful", body = BuyerAuthResponse),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 403, description = "Account locked", body = ApiError)
    ),
    tag = "buyer"
)]
pub async fn login_buyer(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<LoginBuyerRequest>,
) -> Result<Json<BuyerAuthResponse>, ApiError> {
    let email = normalize_email(&request.email)?;

    let invalid_credentials =
        || ApiError::new(ErrorCode::InvalidCredentials, "Invalid email or password");

    let user = users::find_user_by_email(&pool, &email)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(invalid_credentials)?;
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

    let password_ok = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !password_ok {
        return Err(
            match storage::record_password_failure(&pool, user.id)
                .await
                .map_err(ApiError::internal)?
            {
                DbFailureOutcome::Counted { remaining_attempts } => {
                    invalid_credentials().with_remaining_attempts(remaining_attempts)
                }
                DbFailureOutcome::Locked { locked_until } => ApiError::new(
                    ErrorCode::AccountLocked,
                    "Too many failed attempts, account locked",
                )
                .with_remaining_attempts(0)
                .with_locked_until(locked_until),
            },
        );
    }

    storage::reset_login_attempts(&pool, user.id)
        .await
        .map_err(ApiError::internal)?;

    let org_id = storage::buyer_org_for_user(&pool, user.id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidState, "No active organization membership")
        })?;

    let options = SessionOptions::multi_device()
        .with_buyer_org(Some(org_id))
        .with_client(extract_client_ip(&headers), extract_user_agent(&headers));
    let pair = issue_session(&pool, ctx.jwt_secret(), user.id, user.role, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, user.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(BuyerAuthResponse {
        success: true,
        message: "Login successful".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        buyer_org_id: org_id,
        user: super::session::user_summary(&user),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/buyer/logout",
    responses(
        (status = 200, description = "Session cleared", body = StatusResponse)
    ),
    tag = "buyer"
)]
pub async fn logout_buyer(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<StatusResponse>, ApiError> {
    if let Some(token) = extract_bearer_token(&headers) {
        soft_delete_by_hash(&pool, &crate::auth::tokens::sha256_hex(&token))
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
    path = "/v1/buyer/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Always success-shaped", body = StatusResponse)
    ),
    tag = "buyer"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    // Always success-shaped so the endpoint cannot be used to enumerate
    // registered emails.
    let accepted = StatusResponse {
        success: true,
        message: "If the email is registered, reset instructions were sent".to_string(),
    };

    let Ok(email) = normalize_email(&request.email) else {
        return Ok(Json(accepted));
    };
    let Some(user) = users::find_user_by_email(&pool, &email)
        .await
        .map_err(ApiError::internal)?
    else {
        return Ok(Json(accepted));
    };

    let raw_token = generate_token().map_err(ApiError::internal)?;
    storage::create_reset_token(&pool, user.id, &raw_token)
        .await
        .map_err(ApiError::internal)?;
    debug!(user_id = user.id, reset_token = %raw_token, "password reset token issued");

    if let Some(phone) = user.phone {
        send_best_effort(
            ctx.sms(),
            SmsMessage::new(
                phone,
                "A password reset was requested for your Mandi account. Use the link sent to your email within 1 hour.",
            ),
        )
        .await;
    }

    Ok(Json(accepted))
}

#[utoipa::path(
    post,
    path = "/v1/buyer/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = StatusResponse),
        (status = 400, description = "Weak password", body = ApiError),
        (status = 412, description = "Token expired or already used", body = ApiError)
    ),
    tag = "buyer"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let policy = validate_password(&request.new_password);
    if !policy.is_acceptable() {
        return Err(weak_password_error(policy.failed_rules));
    }

    let new_hash = hash_password(&request.new_password).map_err(ApiError::internal)?;
    match storage::consume_reset_token(&pool, request.token.trim(), &new_hash)
        .await
        .map_err(ApiError::internal)?
    {
        ResetOutcome::Done => Ok(Json(StatusResponse {
            success: true,
            message: "Password updated, please log in again".to_string(),
        })),
        ResetOutcome::InvalidToken => Err(ApiError::new(
            ErrorCode::TokenExpired,
            "Reset token is invalid, expired, or already used",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::test_support::memory_context;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn register_request() -> RegisterBuyerRequest {
        RegisterBuyerRequest {
            email: "owner@agro.example".to_string(),
            password: "S3cure!pass".to_string(),
            phone: "9876543210".to_string(),
            full_name: "Meera Shah".to_string(),
            business_name: "Agro Traders".to_string(),
            business_type: "WHOLESALER".to_string(),
            gst_number: None,
        }
    }

    #[tokio::test]
    async fn register_rejects_weak_password_with_rule_list() -> Result<()> {
        let mut request = register_request();
        request.password = "short".to_string();
        let result = register_buyer(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(request),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::WeakPassword);
        assert!(err.failed_rules.as_ref().is_some_and(|rules| !rules.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_unknown_business_type() -> Result<()> {
        let mut request = register_request();
        request.business_type = "SOMETHING".to_string();
        let result = register_buyer(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(request),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn verify_requires_address_fields() -> Result<()> {
        let result = verify_buyer_otp(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(VerifyBuyerOtpRequest {
                phone: "9876543210".to_string(),
                otp: "123456".to_string(),
                address_line: " ".to_string(),
                city: "Mysuru".to_string(),
                district: None,
                state: "Karnataka".to_string(),
                pincode: "570001".to_string(),
                device_id: None,
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn forgot_password_is_success_shaped_for_garbage_email() -> Result<()> {
        let response = forgot_password(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(ForgotPasswordRequest {
                email: "not-an-email".to_string(),
            }),
        )
        .await?;
        assert!(response.0.success);
        Ok(())
    }
}
