//! Farmer onboarding: OTP-backed account creation followed by advisory
//! profile, farm, payment, and PIN steps. Any step may be skipped by the
//! client; skipping costs the farmer verified payment details and PIN login.

pub(crate) mod storage;
pub mod types;

use axum::{Json, extract::Extension, http::HeaderMap};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::state::AppContext;
use crate::auth::{Role, pin};
use crate::otp::{OtpIssue, OtpScope};
use crate::validators::{
    FarmSize, normalize_ifsc, normalize_mobile, normalize_person_name, normalize_upi_vpa,
};

use super::session::storage::{SessionOptions, issue_session};
use super::session::types::{AuthResponse, StatusResponse, UserSummary};
use super::users;
use super::{authenticate_role, extract_client_ip, extract_user_agent};
use storage::CreateUserOutcome;
use types::{
    AddPaymentDetailsRequest, CreateFarmerAccountRequest, FarmProfileRequest,
    FarmerProfileRequest, PaymentResponse, PaymentType, RequestFarmerOtpRequest, SetPinRequest,
    VerifyUpiRequest,
};

const DEFAULT_LANGUAGE: &str = "en";

#[utoipa::path(
    post,
    path = "/v1/farmer/otp/request",
    request_body = RequestFarmerOtpRequest,
    responses(
        (status = 200, description = "OTP issued", body = super::session::types::OtpIssuedResponse),
        (status = 409, description = "Phone already registered", body = ApiError),
        (status = 429, description = "Too many OTP requests", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn request_registration_otp(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<RequestFarmerOtpRequest>,
) -> Result<Json<super::session::types::OtpIssuedResponse>, ApiError> {
    let phone = normalize_mobile(&request.phone)?;
    if users::phone_exists(&pool, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(
            ErrorCode::PhoneExists,
            "Phone number is already registered",
        ));
    }

    match ctx
        .otp()
        .generate(OtpScope::Farmer, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        OtpIssue::Issued { code, sent } => {
            debug!(%phone, otp = %code, sent, "farmer registration otp issued");
            Ok(Json(super::session::types::OtpIssuedResponse {
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
    path = "/v1/farmer/account",
    request_body = CreateFarmerAccountRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 401, description = "Invalid OTP", body = ApiError),
        (status = 409, description = "Phone already registered", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn create_account(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<CreateFarmerAccountRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let phone = normalize_mobile(&request.phone)?;

    let matched = ctx
        .otp()
        .verify(OtpScope::Farmer, &phone, &request.otp)
        .await
        .map_err(ApiError::internal)?;
    if !matched {
        return Err(ApiError::new(ErrorCode::InvalidOtp, "Invalid or expired OTP"));
    }

    let language = request.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
    let user_id = match storage::create_farmer_user(&pool, &phone, language)
        .await
        .map_err(ApiError::internal)?
    {
        CreateUserOutcome::Created(id) => id,
        CreateUserOutcome::PhoneTaken => {
            return Err(ApiError::new(
                ErrorCode::PhoneExists,
                "Phone number is already registered",
            ));
        }
    };

    let options = SessionOptions::single_device(request.device_id)
        .with_client(extract_client_ip(&headers), extract_user_agent(&headers));
    let pair = issue_session(&pool, ctx.jwt_secret(), user_id, Role::Farmer, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, user_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Account created".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        user: UserSummary {
            user_id,
            user_type: Role::Farmer,
            phone: Some(phone),
            email: None,
            full_name: None,
            language: language.to_string(),
        },
    }))
}

async fn save_profile(
    headers: &HeaderMap,
    pool: &PgPool,
    ctx: &AppContext,
    request: FarmerProfileRequest,
) -> Result<StatusResponse, ApiError> {
    let principal = authenticate_role(headers, ctx, pool, &[Role::Farmer]).await?;
    let full_name = normalize_person_name(&request.full_name)?;
    if request.district.trim().is_empty() || request.state.trim().is_empty() {
        return Err(ApiError::invalid("District and state are required"));
    }

    storage::upsert_profile(
        pool,
        principal.user_id,
        &full_name,
        request.district.trim(),
        request.state.trim(),
        request.village.as_deref().map(str::trim),
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(StatusResponse {
        success: true,
        message: "Profile saved".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/farmer/profile",
    request_body = FarmerProfileRequest,
    responses(
        (status = 200, description = "Profile created", body = StatusResponse),
        (status = 400, description = "Missing required fields", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn create_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<FarmerProfileRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(save_profile(&headers, &pool, &ctx, request).await?))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/profile/update",
    request_body = FarmerProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = StatusResponse)
    ),
    tag = "farmer"
)]
pub async fn update_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<FarmerProfileRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(save_profile(&headers, &pool, &ctx, request).await?))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/farm",
    request_body = FarmProfileRequest,
    responses(
        (status = 200, description = "Farm profile saved", body = StatusResponse),
        (status = 400, description = "Unknown farm size", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn save_farm_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<FarmProfileRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Farmer]).await?;
    let farm_size = FarmSize::parse(&request.farm_size)?;

    storage::save_farm_profile(
        &pool,
        principal.user_id,
        farm_size,
        &request.farming_types,
        &request.main_crops,
        request.farm_area_acres,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Farm profile saved".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/payment",
    request_body = AddPaymentDetailsRequest,
    responses(
        (status = 200, description = "Payment method stored", body = PaymentResponse),
        (status = 400, description = "Invalid payment fields", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn add_payment_details(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<AddPaymentDetailsRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Farmer]).await?;
    let payment_type = PaymentType::parse(&request.payment_type)?;

    let (upi_id, bank_account, ifsc) = match payment_type {
        PaymentType::Upi => {
            let raw = request
                .upi_id
                .as_deref()
                .ok_or_else(|| ApiError::invalid("UPI id is required"))?;
            (Some(normalize_upi_vpa(raw)?), None, None)
        }
        PaymentType::Bank => {
            let account = request
                .bank_account
                .as_deref()
                .map(str::trim)
                .filter(|account| !account.is_empty())
                .ok_or_else(|| ApiError::invalid("Bank account is required"))?;
            let ifsc_raw = request
                .ifsc
                .as_deref()
                .ok_or_else(|| ApiError::invalid("IFSC is required"))?;
            (None, Some(account.to_string()), Some(normalize_ifsc(ifsc_raw)?))
        }
    };

    let payment_id = storage::insert_primary_payment(
        &pool,
        principal.user_id,
        payment_type,
        upi_id.as_deref(),
        bank_account.as_deref(),
        ifsc.as_deref(),
        request.bank_name.as_deref(),
        false,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment method stored".to_string(),
        payment_id,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/payment/verify-upi",
    request_body = VerifyUpiRequest,
    responses(
        (status = 200, description = "UPI verified", body = StatusResponse),
        (status = 400, description = "VPA could not be verified", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn verify_upi(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<VerifyUpiRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Farmer]).await?;
    let upi_id = normalize_upi_vpa(&request.upi_id)?;

    if ctx.upi_enabled() {
        let verification = ctx.upi().verify_vpa(&upi_id).await.map_err(|err| {
            tracing::warn!("upi provider unavailable: {err}");
            ApiError::new(ErrorCode::InvalidUpi, "UPI verification unavailable, retry shortly")
        })?;
        if !verification.valid {
            return Err(ApiError::new(
                ErrorCode::InvalidUpi,
                "UPI id could not be verified",
            ));
        }
    }

    let updated = storage::mark_upi_verified(&pool, principal.user_id, &upi_id)
        .await
        .map_err(ApiError::internal)?;
    if !updated {
        return Err(ApiError::invalid("No payment method with this UPI id"));
    }

    Ok(Json(StatusResponse {
        success: true,
        message: "UPI verified".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/pin",
    request_body = SetPinRequest,
    responses(
        (status = 200, description = "PIN set", body = StatusResponse),
        (status = 400, description = "PIN violates the rules", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn set_pin(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<SetPinRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Farmer]).await?;
    if request.pin != request.confirm_pin {
        return Err(ApiError::invalid("PIN and confirmation do not match"));
    }
    pin::validate_permanent_pin(&request.pin)
        .map_err(|err| ApiError::invalid(err.to_string()).with_reason(err.code()))?;

    let pin_hash = pin::hash_pin(&request.pin).map_err(ApiError::internal)?;
    users::set_pin_hash(&pool, principal.user_id, &pin_hash)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(StatusResponse {
        success: true,
        message: "PIN set".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/farmer/login/pin",
    request_body = super::session::types::PinLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid PIN", body = ApiError)
    ),
    tag = "farmer"
)]
pub async fn login_with_pin(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<super::session::types::PinLoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let response = super::session::pin_login(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::test_support::memory_context;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn registration_otp_rejects_bad_phone() -> Result<()> {
        let result = request_registration_otp(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(RequestFarmerOtpRequest {
                phone: "123".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn profile_requires_bearer() -> Result<()> {
        let result = create_profile(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(FarmerProfileRequest {
                full_name: "Ravi Kumar".to_string(),
                district: "Mandya".to_string(),
                state: "Karnataka".to_string(),
                village: None,
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        Ok(())
    }
}
