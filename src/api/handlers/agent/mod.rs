//! Field-agent provisioning and lifecycle.
//!
//! District managers create agents with a temporary PIN delivered over SMS.
//! The agent's first login exchanges that PIN for a short-lived pin-change
//! token; setting the permanent PIN issues real credentials. Training
//! completion, deactivation, and zone reassignment round out the lifecycle.

pub(crate) mod storage;
pub mod types;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::sms::{SmsMessage, send_best_effort};
use crate::api::state::AppContext;
use crate::auth::{Role, jwt, pin};
use crate::rate_limit::clear_login_failures;
use crate::validators::{normalize_mobile, normalize_person_name};

use super::session::storage::{SessionOptions, issue_session};
use super::session::types::StatusResponse;
use super::zones::storage as zones_storage;
use super::{Principal, authenticate, users};
use storage::{AgentRow, CreateAgentOutcome, NewAgent, TrainingOutcome};
use types::{
    AgentDashboardResponse, AgentDetailsResponse, AgentSetPinRequest, AgentSetPinResponse,
    AgentStatus, AgentView, CompleteTrainingRequest, CompleteTrainingResponse, CreateAgentRequest,
    CreateAgentResponse, DeactivateAgentRequest, EmploymentType, FirstLoginRequest,
    FirstLoginResponse, ListAgentsResponse, ReassignZoneRequest,
};

const TEMP_PIN_TTL_HOURS: i64 = 72;

fn agent_view(agent: &AgentRow) -> Result<AgentView, ApiError> {
    let status = AgentStatus::parse(&agent.status)
        .ok_or_else(|| ApiError::internal(format!("unknown agent status {}", agent.status)))?;
    Ok(AgentView {
        user_id: agent.user_id,
        employee_id: agent.employee_id.clone(),
        full_name: agent.full_name.clone(),
        phone: agent.phone.clone(),
        status,
        employment_type: agent.employment_type.clone(),
        start_date: agent.start_date,
        training_completed_at: agent.training_completed_at,
        zone_id: agent.zone_id,
        zone_name: agent.zone_name.clone(),
    })
}

/// Admins may act on any zone; everyone else must be the zone's district
/// manager (inherited through ancestors).
async fn require_zone_authority(
    principal: &Principal,
    pool: &PgPool,
    zone_id: i64,
) -> Result<(), ApiError> {
    if principal.role == Role::Admin {
        return Ok(());
    }
    let manager = zones_storage::manager_for_zone(pool, zone_id)
        .await
        .map_err(ApiError::internal)?;
    if manager == Some(principal.user_id) {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::Unauthorized,
            "Caller does not manage this zone",
        ))
    }
}

async fn agent_or_not_found(pool: &PgPool, user_id: i64) -> Result<AgentRow, ApiError> {
    storage::agent_by_user(pool, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::PhoneNotRegistered, "No such agent"))
}

#[utoipa::path(
    post,
    path = "/v1/agents",
    request_body = CreateAgentRequest,
    responses(
        (status = 200, description = "Agent provisioned", body = CreateAgentResponse),
        (status = 403, description = "Caller does not manage the zone", body = ApiError),
        (status = 409, description = "Mobile already registered", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn create_agent(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<Json<CreateAgentResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;

    let zone = zones_storage::find_zone(&pool, request.zone_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::invalid("Unknown zone"))?;
    require_zone_authority(&principal, &pool, zone.id).await?;

    let full_name = normalize_person_name(&request.name)?;
    let phone = normalize_mobile(&request.mobile)?;
    let employment_type = EmploymentType::parse(&request.employment_type)?;
    let start_date = NaiveDate::parse_from_str(request.start_date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::invalid("Start date must be YYYY-MM-DD"))?;

    if users::phone_exists(&pool, &phone)
        .await
        .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(
            ErrorCode::PhoneExists,
            "Mobile number is already registered",
        ));
    }

    // Employee ids are sequenced per state; fall back to the zone's own code
    // when the tree has no state ancestor.
    let state = zones_storage::state_ancestor(&pool, zone.id)
        .await
        .map_err(ApiError::internal)?;
    let state_code = state
        .and_then(|state| state.code)
        .or(zone.code)
        .unwrap_or_else(|| "XX".to_string());

    let temp_pin = pin::generate_temp_pin();
    let temp_pin_hash = pin::hash_pin(&temp_pin).map_err(ApiError::internal)?;

    let outcome = storage::create_agent(
        &pool,
        &NewAgent {
            full_name: &full_name,
            phone: &phone,
            zone_id: zone.id,
            state_code: &state_code,
            start_date,
            employment_type: employment_type.as_str(),
            temp_pin_hash: &temp_pin_hash,
            temp_pin_ttl_hours: TEMP_PIN_TTL_HOURS,
            created_by: principal.user_id,
        },
    )
    .await
    .map_err(ApiError::internal)?;

    let (user_id, employee_id) = match outcome {
        CreateAgentOutcome::Created {
            user_id,
            employee_id,
        } => (user_id, employee_id),
        CreateAgentOutcome::PhoneTaken => {
            return Err(ApiError::new(
                ErrorCode::PhoneExists,
                "Mobile number is already registered",
            ));
        }
    };

    // Temporary PIN visibility for the operations log; the welcome SMS is the
    // delivery channel.
    info!(user_id, %employee_id, %phone, %temp_pin, "field agent provisioned");
    send_best_effort(
        ctx.sms(),
        SmsMessage::new(
            phone,
            format!(
                "Welcome to Mandi. Your temporary PIN is {temp_pin}. Log in within {TEMP_PIN_TTL_HOURS} hours to set your own PIN."
            ),
        ),
    )
    .await;

    Ok(Json(CreateAgentResponse {
        success: true,
        message: "Agent created".to_string(),
        agent_id: user_id,
        employee_id,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/agents/first-login",
    request_body = FirstLoginRequest,
    responses(
        (status = 200, description = "Pin-change token issued", body = FirstLoginResponse),
        (status = 401, description = "Invalid temporary PIN", body = ApiError),
        (status = 412, description = "Temporary PIN expired", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn first_login(
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<FirstLoginRequest>,
) -> Result<Json<FirstLoginResponse>, ApiError> {
    if !pin::valid_temp_pin_format(&request.temp_pin) {
        return Err(ApiError::invalid("Temporary PIN must be 6 digits"));
    }
    let phone = normalize_mobile(&request.mobile)?;
    super::session::ensure_not_locked(&ctx, &phone).await?;
    let user = super::session::login_user_by_phone(&pool, &phone).await?;
    if user.role != Role::Agent {
        return Err(ApiError::new(ErrorCode::Unauthorized, "Not an agent account"));
    }

    let Some(temp_pin_hash) = user.temp_pin_hash.as_deref() else {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "No temporary PIN pending; use your permanent PIN",
        ));
    };
    if user
        .temp_pin_expires_at
        .is_none_or(|expires_at| expires_at <= Utc::now())
    {
        return Err(ApiError::new(
            ErrorCode::PinExpired,
            "Temporary PIN has expired; ask your manager for a new one",
        ));
    }
    if !pin::verify_pin(&request.temp_pin, temp_pin_hash) {
        return Err(super::session::verification_failure(
            &ctx,
            &phone,
            ErrorCode::InvalidPin,
            "Invalid temporary PIN",
        )
        .await);
    }
    clear_login_failures(ctx.kv(), &phone)
        .await
        .map_err(ApiError::internal)?;

    let now = Utc::now().timestamp();
    let claims = jwt::Claims::new(user.id, Role::Agent, now, jwt::PIN_CHANGE_TTL_SECONDS)
        .with_purpose(jwt::PURPOSE_PIN_CHANGE);
    let temporary_token =
        jwt::sign_hs256(ctx.jwt_secret(), &claims).map_err(ApiError::internal)?;

    Ok(Json(FirstLoginResponse {
        success: true,
        message: "Set a permanent PIN to continue".to_string(),
        requires_pin_change: true,
        temporary_token,
        expires_in: u32::try_from(jwt::PIN_CHANGE_TTL_SECONDS).unwrap_or(900),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/agents/set-pin",
    request_body = AgentSetPinRequest,
    responses(
        (status = 200, description = "PIN set, credentials issued", body = AgentSetPinResponse),
        (status = 400, description = "PIN violates the rules", body = ApiError),
        (status = 412, description = "Pin-change token expired", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn set_pin(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<AgentSetPinRequest>,
) -> Result<Json<AgentSetPinResponse>, ApiError> {
    let claims = jwt::verify_purpose_token(
        &request.temporary_token,
        ctx.jwt_secret(),
        jwt::PURPOSE_PIN_CHANGE,
        Utc::now().timestamp(),
    )
    .map_err(|_| {
        ApiError::new(
            ErrorCode::TokenExpired,
            "Pin-change token is invalid or expired",
        )
    })?;

    if request.new_pin != request.confirm_pin {
        return Err(ApiError::invalid("PIN and confirmation do not match"));
    }
    pin::validate_permanent_pin(&request.new_pin)
        .map_err(|err| ApiError::invalid(err.to_string()).with_reason(err.code()))?;

    let pin_hash = pin::hash_pin(&request.new_pin).map_err(ApiError::internal)?;
    storage::set_permanent_pin(&pool, claims.user_id, &pin_hash)
        .await
        .map_err(ApiError::internal)?;

    let agent = agent_or_not_found(&pool, claims.user_id).await?;
    let options = SessionOptions::single_device(None).with_client(
        super::extract_client_ip(&headers),
        super::extract_user_agent(&headers),
    );
    let pair = issue_session(&pool, ctx.jwt_secret(), claims.user_id, Role::Agent, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, claims.user_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(AgentSetPinResponse {
        success: true,
        message: "PIN set".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        requires_training: agent.status == "TRAINING",
    }))
}

#[utoipa::path(
    post,
    path = "/v1/agents/complete-training",
    request_body = CompleteTrainingRequest,
    responses(
        (status = 200, description = "Training state", body = CompleteTrainingResponse),
        (status = 404, description = "No such agent", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn complete_training(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<CompleteTrainingRequest>,
) -> Result<Json<CompleteTrainingResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    // The agent may complete their own training; anyone else needs authority
    // over the agent's zone.
    if principal.user_id != request.user_id {
        let agent = agent_or_not_found(&pool, request.user_id).await?;
        match agent.zone_id {
            Some(zone_id) => require_zone_authority(&principal, &pool, zone_id).await?,
            None if principal.role == Role::Admin => {}
            None => {
                return Err(ApiError::new(
                    ErrorCode::Unauthorized,
                    "Caller cannot manage this agent",
                ));
            }
        }
    }

    match storage::complete_training(&pool, request.user_id)
        .await
        .map_err(ApiError::internal)?
    {
        TrainingOutcome::Completed => Ok(Json(CompleteTrainingResponse {
            success: true,
            message: "Training completed".to_string(),
            already_completed: false,
        })),
        TrainingOutcome::AlreadyCompleted => Ok(Json(CompleteTrainingResponse {
            success: true,
            message: "Training already completed".to_string(),
            already_completed: true,
        })),
        TrainingOutcome::NotFound => Err(ApiError::new(
            ErrorCode::PhoneNotRegistered,
            "No such agent",
        )),
    }
}

#[utoipa::path(
    post,
    path = "/v1/agents/deactivate",
    request_body = DeactivateAgentRequest,
    responses(
        (status = 200, description = "Agent deactivated", body = StatusResponse),
        (status = 412, description = "Agent already inactive", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn deactivate_agent(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<DeactivateAgentRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::invalid("A deactivation reason is required"));
    }

    let agent = agent_or_not_found(&pool, request.agent_id).await?;
    match agent.zone_id {
        Some(zone_id) => require_zone_authority(&principal, &pool, zone_id).await?,
        None if principal.role == Role::Admin => {}
        None => {
            return Err(ApiError::new(
                ErrorCode::Unauthorized,
                "Caller cannot manage this agent",
            ));
        }
    }

    let deactivated = storage::deactivate(&pool, request.agent_id, reason)
        .await
        .map_err(ApiError::internal)?;
    if !deactivated {
        return Err(ApiError::new(
            ErrorCode::InvalidState,
            "Agent is already inactive",
        ));
    }

    if let Some(phone) = agent.phone {
        send_best_effort(
            ctx.sms(),
            SmsMessage::new(
                phone,
                "Your Mandi field agent account has been deactivated. Contact your manager for details.",
            ),
        )
        .await;
    }

    Ok(Json(StatusResponse {
        success: true,
        message: "Agent deactivated".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/agents/reassign-zone",
    request_body = ReassignZoneRequest,
    responses(
        (status = 200, description = "Zone reassigned", body = StatusResponse),
        (status = 400, description = "Unknown zone", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn reassign_zone(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<ReassignZoneRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;

    let zone = zones_storage::find_zone(&pool, request.new_zone_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::invalid("Unknown zone"))?;
    require_zone_authority(&principal, &pool, zone.id).await?;

    let _agent = agent_or_not_found(&pool, request.agent_id).await?;
    let effective_from = match request.effective_from.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| ApiError::invalid("Effective date must be YYYY-MM-DD"))?,
        None => Utc::now().date_naive(),
    };

    storage::reassign_zone(
        &pool,
        request.agent_id,
        zone.id,
        principal.user_id,
        effective_from,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Zone reassigned".to_string(),
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsQuery {
    pub status: Option<String>,
    pub zone_id: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/agents",
    params(ListAgentsQuery),
    responses(
        (status = 200, description = "Agents matching the filters", body = ListAgentsResponse)
    ),
    tag = "agent"
)]
pub async fn list_agents(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<Json<ListAgentsResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    if principal.role != Role::Admin {
        // District managers must scope the listing to a zone they manage.
        let Some(zone_id) = query.zone_id else {
            return Err(ApiError::new(
                ErrorCode::Unauthorized,
                "A zone filter is required",
            ));
        };
        require_zone_authority(&principal, &pool, zone_id).await?;
    }

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            AgentStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid("Unknown agent status"))?
                .as_str(),
        ),
        None => None,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 50);

    let (agents, total) = storage::list_agents(&pool, status, query.zone_id, page, limit)
        .await
        .map_err(ApiError::internal)?;
    let agents = agents
        .iter()
        .map(agent_view)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ListAgentsResponse {
        success: true,
        page,
        limit,
        total,
        agents,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/agents/{agentId}",
    params(("agentId" = i64, Path, description = "Agent user id")),
    responses(
        (status = 200, description = "Agent details", body = AgentDetailsResponse),
        (status = 404, description = "No such agent", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn get_agent_details(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Path(agent_id): Path<i64>,
) -> Result<Json<AgentDetailsResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    let agent = agent_or_not_found(&pool, agent_id).await?;
    if principal.user_id != agent_id {
        match agent.zone_id {
            Some(zone_id) => require_zone_authority(&principal, &pool, zone_id).await?,
            None if principal.role == Role::Admin => {}
            None => {
                return Err(ApiError::new(
                    ErrorCode::Unauthorized,
                    "Caller cannot view this agent",
                ));
            }
        }
    }

    Ok(Json(AgentDetailsResponse {
        success: true,
        agent: agent_view(&agent)?,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/agents/dashboard",
    responses(
        (status = 200, description = "Caller's agent dashboard", body = AgentDashboardResponse),
        (status = 403, description = "Caller is not an agent", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn get_dashboard(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
) -> Result<Json<AgentDashboardResponse>, ApiError> {
    let principal =
        super::authenticate_role(&headers, &ctx, &pool, &[Role::Agent]).await?;
    let agent = agent_or_not_found(&pool, principal.user_id).await?;
    let requires_training = agent.status == "TRAINING";

    Ok(Json(AgentDashboardResponse {
        success: true,
        agent: agent_view(&agent)?,
        requires_training,
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
    async fn first_login_checks_pin_shape_first() -> Result<()> {
        let result = first_login(
            Extension(lazy_pool()?),
            Extension(memory_context()),
            Json(FirstLoginRequest {
                mobile: "9811122233".to_string(),
                temp_pin: "12345".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn set_pin_rejects_foreign_tokens() -> Result<()> {
        let ctx = memory_context();
        // A normal access token must not pass the purpose gate.
        let claims = jwt::Claims::new(1, Role::Agent, Utc::now().timestamp(), 3600);
        let token = jwt::sign_hs256(ctx.jwt_secret(), &claims).map_err(|e| anyhow::anyhow!(e))?;

        let result = set_pin(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(ctx),
            Json(AgentSetPinRequest {
                temporary_token: token,
                new_pin: "4827".to_string(),
                confirm_pin: "4827".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::TokenExpired);
        Ok(())
    }

    #[tokio::test]
    async fn set_pin_surfaces_sequential_reason() -> Result<()> {
        let ctx = memory_context();
        let claims = jwt::Claims::new(1, Role::Agent, Utc::now().timestamp(), 900)
            .with_purpose(jwt::PURPOSE_PIN_CHANGE);
        let token = jwt::sign_hs256(ctx.jwt_secret(), &claims).map_err(|e| anyhow::anyhow!(e))?;

        let result = set_pin(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(ctx),
            Json(AgentSetPinRequest {
                temporary_token: token,
                new_pin: "1234".to_string(),
                confirm_pin: "1234".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("must fail");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.reason.as_deref(), Some("SEQUENTIAL"));
        Ok(())
    }
}
