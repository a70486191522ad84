//! Admin verification queue for submitted hauler registrations.

use axum::{
    Json,
    extract::{Extension, Query},
    http::HeaderMap,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::sms::{SmsMessage, send_best_effort};
use crate::api::state::AppContext;
use crate::auth::Role;
use crate::validators::mask_dl_number;

use super::super::{authenticate_role, users};
use super::storage;
use super::types::{
    PendingHaulerView, PendingVerificationsResponse, StepResponse, VerifyAction,
    VerifyHaulerRequest,
};

const MAX_PAGE_SIZE: i64 = 50;
const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerificationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub district: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/hauler/verifications",
    params(PendingVerificationsQuery),
    responses(
        (status = 200, description = "Pending registrations, oldest first", body = PendingVerificationsResponse),
        (status = 403, description = "Caller is not an admin", body = ApiError)
    ),
    tag = "hauler-admin"
)]
pub async fn get_pending_verifications(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Query(query): Query<PendingVerificationsQuery>,
) -> Result<Json<PendingVerificationsResponse>, ApiError> {
    authenticate_role(&headers, &ctx, &pool, &[Role::Admin]).await?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let district = query
        .district
        .as_deref()
        .map(str::trim)
        .filter(|district| !district.is_empty());

    let (profiles, total) = storage::pending_verifications(&pool, page, limit, district)
        .await
        .map_err(ApiError::internal)?;

    let mut haulers = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let documents = storage::documents_for_profile(&pool, profile.id)
            .await
            .map_err(ApiError::internal)?;
        haulers.push(PendingHaulerView {
            hauler_id: profile.id,
            user_id: profile.user_id,
            full_name: profile.full_name,
            phone: profile.phone,
            vehicle_type: profile.vehicle_type,
            vehicle_number: profile.vehicle_number,
            payload_capacity_kg: profile.payload_capacity_kg,
            dl_number: profile.dl_number.as_deref().map(mask_dl_number),
            dl_expiry: profile.dl_expiry,
            district: profile.district,
            submitted_at: profile.submitted_at,
            documents,
        });
    }

    Ok(Json(PendingVerificationsResponse {
        success: true,
        page,
        limit,
        total,
        haulers,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/hauler/verify",
    request_body = VerifyHaulerRequest,
    responses(
        (status = 200, description = "Decision applied", body = StepResponse),
        (status = 400, description = "Missing rejection reason", body = ApiError),
        (status = 412, description = "Registration is no longer pending", body = ApiError)
    ),
    tag = "hauler-admin"
)]
pub async fn verify_hauler(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<VerifyHaulerRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let principal = authenticate_role(&headers, &ctx, &pool, &[Role::Admin]).await?;

    let action = VerifyAction::parse(&request.action)?;
    let rejection_reason = request
        .rejection_reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty());
    if action == VerifyAction::Reject && rejection_reason.is_none() {
        return Err(ApiError::invalid("A rejection reason is required"));
    }

    let outcome = storage::apply_decision(
        &pool,
        request.hauler_id,
        action,
        rejection_reason,
        principal.user_id,
    )
    .await
    .map_err(ApiError::internal)?;

    let user_id = match outcome {
        storage::DecisionOutcome::Applied { user_id } => user_id,
        storage::DecisionOutcome::NotPending => {
            return Err(ApiError::new(
                ErrorCode::InvalidState,
                "Registration is not pending verification",
            ));
        }
    };

    if let Some(user) = users::find_user_by_id(&pool, user_id)
        .await
        .map_err(ApiError::internal)?
        && let Some(phone) = user.phone
    {
        let body = match action {
            VerifyAction::Approve => {
                "Your Mandi transporter account is verified. You can start accepting loads."
            }
            VerifyAction::Reject => {
                "Your Mandi transporter registration was rejected. Contact support for details."
            }
        };
        send_best_effort(ctx.sms(), SmsMessage::new(phone, body)).await;
    }

    Ok(Json(StepResponse {
        success: true,
        message: match action {
            VerifyAction::Approve => "Hauler approved".to_string(),
            VerifyAction::Reject => "Hauler rejected".to_string(),
        },
        current_step: 4,
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

    #[tokio::test]
    async fn queue_requires_admin_bearer() -> Result<()> {
        let result = get_pending_verifications(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Query(PendingVerificationsQuery {
                page: None,
                limit: None,
                district: None,
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        Ok(())
    }

    #[tokio::test]
    async fn reject_without_reason_fails_before_auth_is_not_possible() -> Result<()> {
        // Authentication runs first; an anonymous caller never reaches the
        // reason check.
        let result = verify_hauler(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(VerifyHaulerRequest {
                hauler_id: 1,
                action: "REJECT".to_string(),
                rejection_reason: None,
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        Ok(())
    }
}
