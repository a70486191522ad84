//! Hauler onboarding: four steps under a registration token, then submission
//! into the admin verification queue.
//!
//! Step-1 state lives in the key-value store under `hauler_reg:<token>`; once
//! the OTP is verified the token moves onto the stub profile row and every
//! later step resolves it from the database. A step advances only from the
//! immediately preceding step; re-submitting the current step replaces its
//! data.

pub mod admin;
pub(crate) mod storage;
pub mod types;

use axum::{
    Json,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::sms::{SmsMessage, send_best_effort};
use crate::api::state::AppContext;
use crate::auth::Role;
use crate::kv::hauler_registration_key;
use crate::otp::{OtpIssue, OtpScope};
use crate::validators::{
    VehicleType, check_payload_capacity, mask_dl_number, normalize_dl_number, normalize_ifsc,
    normalize_mobile, normalize_person_name, normalize_upi_vpa, normalize_vehicle_number,
    parse_dl_expiry_now,
};

use super::farmer::storage::insert_primary_payment;
use super::farmer::types::PaymentType;
use super::users;
use super::authenticate_role;
use storage::{CreateHaulerOutcome, HaulerProfileRow};
use types::{
    DocumentType, HaulerProfileResponse, HaulerVerifyOtpRequest, LicenseInfoRequest,
    PaymentInfoRequest, PendingHaulerRegistration, Step1Request, Step1Response, StepResponse,
    SubmitRequest, SubmitResponse, VehicleEligibilityEntry, VehicleEligibilityResponse,
    VehicleInfoRequest, VerificationStatus,
};

const REGISTRATION_TTL: Duration = Duration::from_secs(600);

/// Resolve a token to its profile, or the canonical "handle unknown or
/// expired" failure.
async fn profile_for_token(
    pool: &PgPool,
    registration_token: &str,
) -> Result<HaulerProfileRow, ApiError> {
    storage::find_profile_by_token(pool, registration_token)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::RegistrationNotFound,
                "Registration not found or already submitted",
            )
        })
}

/// Enforce the no-skipping rule: a step runs only when the profile sits on
/// the previous step, or on the step itself (idempotent replacement).
fn ensure_step(profile: &HaulerProfileRow, step: i32) -> Result<(), ApiError> {
    if profile.verification_status != "IN_PROGRESS" {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "Registration is no longer editable",
        ));
    }
    if profile.current_step == step - 1 || profile.current_step == step {
        Ok(())
    } else if profile.current_step < step - 1 {
        Err(ApiError::new(
            ErrorCode::InvalidState,
            "Complete the previous step first",
        ))
    } else {
        Err(ApiError::new(
            ErrorCode::InvalidState,
            "This step has already been completed",
        ))
    }
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/step1",
    request_body = Step1Request,
    responses(
        (status = 200, description = "Registration started", body = Step1Response),
        (status = 409, description = "Phone already registered", body = ApiError),
        (status = 429, description = "Too many OTP requests", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn register_step1(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<Step1Request>,
) -> Result<Json<Step1Response>, ApiError> {
    let full_name = normalize_person_name(&request.name)?;
    let phone = normalize_mobile(&request.mobile)?;
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
        .generate(OtpScope::Hauler, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        OtpIssue::Issued { code, sent } => {
            debug!(%phone, otp = %code, sent, "hauler registration otp issued");
        }
        OtpIssue::RateLimited => {
            return Err(ApiError::new(
                ErrorCode::RateExceeded,
                "Too many OTP requests, try again later",
            ));
        }
    }

    let registration_token = Uuid::new_v4().to_string();
    let bundle = PendingHaulerRegistration { full_name, phone };
    let bundle_json = serde_json::to_string(&bundle).map_err(ApiError::internal)?;
    ctx.kv()
        .set_ex(
            &hauler_registration_key(&registration_token),
            &bundle_json,
            REGISTRATION_TTL,
        )
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(Step1Response {
        success: true,
        message: "OTP sent to your mobile number".to_string(),
        registration_token,
        expires_in: crate::otp::OTP_TTL_SECONDS,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/verify-otp",
    request_body = HaulerVerifyOtpRequest,
    responses(
        (status = 200, description = "Hauler account created", body = StepResponse),
        (status = 401, description = "Invalid OTP", body = ApiError),
        (status = 404, description = "Registration expired or unknown", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn verify_otp(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<HaulerVerifyOtpRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let key = hauler_registration_key(&request.registration_token);
    let bundle_json = ctx
        .kv()
        .get(&key)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::RegistrationNotFound,
                "Registration expired, please start again",
            )
        })?;
    let bundle: PendingHaulerRegistration =
        serde_json::from_str(&bundle_json).map_err(ApiError::internal)?;

    let matched = ctx
        .otp()
        .verify(OtpScope::Hauler, &bundle.phone, &request.otp)
        .await
        .map_err(ApiError::internal)?;
    if !matched {
        return Err(ApiError::new(ErrorCode::InvalidOtp, "Invalid or expired OTP"));
    }

    match storage::create_hauler_user(&pool, &bundle, &request.registration_token)
        .await
        .map_err(ApiError::internal)?
    {
        CreateHaulerOutcome::Created { .. } => {}
        CreateHaulerOutcome::PhoneTaken => {
            return Err(ApiError::new(
                ErrorCode::PhoneExists,
                "Phone number is already registered",
            ));
        }
    }
    ctx.kv().del(&key).await.map_err(ApiError::internal)?;

    Ok(Json(StepResponse {
        success: true,
        message: "Mobile number verified".to_string(),
        current_step: 1,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/vehicle",
    request_body = VehicleInfoRequest,
    responses(
        (status = 200, description = "Vehicle details stored", body = StepResponse),
        (status = 400, description = "Validation failure", body = ApiError),
        (status = 409, description = "Vehicle already registered", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn add_vehicle_info(
    pool: Extension<PgPool>,
    Json(request): Json<VehicleInfoRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let profile = profile_for_token(&pool, &request.registration_token).await?;
    ensure_step(&profile, 2)?;

    let vehicle_type = VehicleType::parse(&request.vehicle_type)?;
    check_payload_capacity(vehicle_type, request.payload_capacity_kg)?;
    let vehicle_number = normalize_vehicle_number(&request.vehicle_number)?;
    if request.photo_front_url.trim().is_empty() || request.photo_side_url.trim().is_empty() {
        return Err(ApiError::invalid("Front and side vehicle photos are required"));
    }

    if storage::vehicle_number_taken(&pool, &vehicle_number, profile.id)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(
            ErrorCode::DuplicateVehicleNumber,
            "This vehicle is already registered",
        ));
    }

    let mut documents = vec![
        (DocumentType::VehiclePhotoFront, request.photo_front_url.trim()),
        (DocumentType::VehiclePhotoSide, request.photo_side_url.trim()),
    ];
    if let Some(other) = request
        .photo_other_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        documents.push((DocumentType::VehiclePhotoOther, other));
    }

    storage::set_vehicle_info(
        &pool,
        profile.id,
        vehicle_type.as_str(),
        &vehicle_number,
        request.payload_capacity_kg,
        request.district.as_deref().map(str::trim),
        &documents,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(StepResponse {
        success: true,
        message: "Vehicle details stored".to_string(),
        current_step: 2,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/license",
    request_body = LicenseInfoRequest,
    responses(
        (status = 200, description = "Licence details stored", body = StepResponse),
        (status = 400, description = "Validation failure", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn add_license_info(
    pool: Extension<PgPool>,
    Json(request): Json<LicenseInfoRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let profile = profile_for_token(&pool, &request.registration_token).await?;
    ensure_step(&profile, 3)?;

    let dl_number = normalize_dl_number(&request.dl_number)?;
    let dl_expiry = parse_dl_expiry_now(&request.dl_expiry)?;
    if request.dl_front_url.trim().is_empty() || request.dl_back_url.trim().is_empty() {
        return Err(ApiError::invalid("Both licence photos are required"));
    }

    let documents = [
        (DocumentType::DlFront, request.dl_front_url.trim()),
        (DocumentType::DlBack, request.dl_back_url.trim()),
    ];
    storage::set_license_info(&pool, profile.id, &dl_number, dl_expiry, &documents)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(StepResponse {
        success: true,
        message: "Licence details stored".to_string(),
        current_step: 3,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/payment",
    request_body = PaymentInfoRequest,
    responses(
        (status = 200, description = "Payment details stored", body = StepResponse),
        (status = 400, description = "UPI could not be verified", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn add_payment_info(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<PaymentInfoRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let profile = profile_for_token(&pool, &request.registration_token).await?;
    ensure_step(&profile, 4)?;

    let upi_id = normalize_upi_vpa(&request.upi_id)?;
    // UPI verification is required here, unlike the advisory farmer step.
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

    let bank_account = request
        .bank_account
        .as_deref()
        .map(str::trim)
        .filter(|account| !account.is_empty());
    let (ifsc, bank_name) = match bank_account {
        Some(_) => {
            let ifsc_raw = request
                .ifsc
                .as_deref()
                .ok_or_else(|| ApiError::invalid("IFSC is required with a bank account"))?;
            let ifsc = normalize_ifsc(ifsc_raw)?;
            let bank_name = if ctx.upi_enabled() {
                let resolved = ctx.upi().lookup_ifsc(&ifsc).await.map_err(|err| {
                    tracing::warn!("ifsc lookup unavailable: {err}");
                    ApiError::new(ErrorCode::InvalidUpi, "Bank lookup unavailable, retry shortly")
                })?;
                Some(resolved.ok_or_else(|| ApiError::invalid("Unknown IFSC code"))?)
            } else {
                None
            };
            (Some(ifsc), bank_name)
        }
        None => (None, None),
    };

    insert_primary_payment(
        &pool,
        profile.user_id,
        PaymentType::Upi,
        Some(&upi_id),
        bank_account,
        ifsc.as_deref(),
        bank_name.as_deref(),
        true,
    )
    .await
    .map_err(ApiError::internal)?;
    storage::set_payment_step_done(&pool, profile.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(StepResponse {
        success: true,
        message: "Payment details stored".to_string(),
        current_step: 4,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/register/submit",
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Submitted for verification", body = SubmitResponse),
        (status = 412, description = "Steps incomplete", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn submit_registration(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let profile = profile_for_token(&pool, &request.registration_token).await?;
    if profile.current_step != 4 {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "Complete all steps before submitting",
        ));
    }

    let submitted = storage::submit_registration(&pool, profile.id)
        .await
        .map_err(ApiError::internal)?;
    if !submitted {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "Registration was already submitted",
        ));
    }

    send_best_effort(
        ctx.sms(),
        SmsMessage::new(
            profile.phone.clone(),
            "Your Mandi transporter registration was submitted and is pending verification.",
        ),
    )
    .await;

    Ok(Json(SubmitResponse {
        success: true,
        message: "Registration submitted for verification".to_string(),
        verification_status: VerificationStatus::PendingVerification,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/hauler/eligibility",
    responses(
        (status = 200, description = "Vehicle eligibility table", body = VehicleEligibilityResponse)
    ),
    tag = "hauler"
)]
pub async fn vehicle_eligibility() -> Json<VehicleEligibilityResponse> {
    Json(VehicleEligibilityResponse {
        success: true,
        vehicles: VehicleType::ALL
            .iter()
            .map(|vehicle_type| VehicleEligibilityEntry {
                vehicle_type: vehicle_type.as_str().to_string(),
                max_capacity_kg: vehicle_type.max_capacity_kg(),
                max_radius_km: vehicle_type.max_radius_km(),
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct HaulerProfileQuery {
    /// Registration token for in-progress flows; otherwise the bearer token
    /// identifies the hauler.
    pub registration_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/hauler/profile",
    params(HaulerProfileQuery),
    responses(
        (status = 200, description = "Hauler profile projection", body = HaulerProfileResponse),
        (status = 404, description = "No profile found", body = ApiError)
    ),
    tag = "hauler"
)]
pub async fn get_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Query(query): Query<HaulerProfileQuery>,
) -> Result<Json<HaulerProfileResponse>, ApiError> {
    let profile = match query.registration_token.as_deref() {
        Some(token) => profile_for_token(&pool, token).await?,
        None => {
            let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Hauler]).await?;
            storage::find_profile_by_user(&pool, principal.user_id)
                .await
                .map_err(ApiError::internal)?
                .ok_or_else(|| {
                    ApiError::new(ErrorCode::RegistrationNotFound, "No hauler profile found")
                })?
        }
    };

    let documents = storage::documents_for_profile(&pool, profile.id)
        .await
        .map_err(ApiError::internal)?;
    let verification_status = VerificationStatus::parse(&profile.verification_status)
        .ok_or_else(|| ApiError::internal("unknown verification status"))?;

    Ok(Json(HaulerProfileResponse {
        success: true,
        hauler_id: profile.id,
        full_name: profile.full_name,
        phone: profile.phone,
        current_step: profile.current_step,
        verification_status,
        vehicle_type: profile.vehicle_type,
        vehicle_number: (!profile.vehicle_number.starts_with("TMP-"))
            .then_some(profile.vehicle_number),
        payload_capacity_kg: profile.payload_capacity_kg,
        dl_number: profile.dl_number.as_deref().map(mask_dl_number),
        dl_expiry: profile.dl_expiry,
        rejection_reason: profile.rejection_reason,
        documents,
    }))
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

    fn profile_at_step(step: i32) -> HaulerProfileRow {
        HaulerProfileRow {
            id: 1,
            user_id: 10,
            full_name: Some("Ravi".to_string()),
            phone: "9000011111".to_string(),
            vehicle_type: None,
            vehicle_number: "TMP-x".to_string(),
            payload_capacity_kg: None,
            dl_number: None,
            dl_expiry: None,
            district: None,
            current_step: step,
            verification_status: "IN_PROGRESS".to_string(),
            rejection_reason: None,
            submitted_at: None,
        }
    }

    #[test]
    fn step_guard_allows_previous_and_current_only() {
        assert!(ensure_step(&profile_at_step(1), 2).is_ok());
        assert!(ensure_step(&profile_at_step(2), 2).is_ok());

        let err = ensure_step(&profile_at_step(1), 3).err().expect("skip");
        assert_eq!(err.code, ErrorCode::InvalidState);

        let err = ensure_step(&profile_at_step(3), 2).err().expect("rewind");
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn step_guard_rejects_submitted_registrations() {
        let mut profile = profile_at_step(4);
        profile.verification_status = "PENDING_VERIFICATION".to_string();
        assert!(ensure_step(&profile, 4).is_err());
    }

    #[tokio::test]
    async fn verify_otp_with_unknown_token_is_not_found() -> Result<()> {
        let result = verify_otp(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(HaulerVerifyOtpRequest {
                registration_token: "missing".to_string(),
                otp: "123456".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::RegistrationNotFound);
        Ok(())
    }

    #[tokio::test]
    async fn eligibility_table_matches_limits() {
        let response = vehicle_eligibility().await;
        assert_eq!(response.0.vehicles.len(), 4);
        let bike = &response.0.vehicles[0];
        assert_eq!(bike.vehicle_type, "BIKE");
        assert_eq!(bike.max_capacity_kg, 20);
        assert_eq!(bike.max_radius_km, 10);
    }
}
