//! Team membership lifecycle for buyer organizations.
//!
//! Invitations carry a 24-hour bcrypt-verified token; acceptance creates the
//! member's account and an active membership in one transaction and issues a
//! full session. Admin-gated mutations enforce the last-admin invariant and
//! record role changes in the append-only audit.

pub(crate) mod storage;
pub mod types;

use axum::{
    Json,
    extract::{Extension, Query},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::sms::{SmsMessage, send_best_effort};
use crate::api::state::AppContext;
use crate::auth::Role;
use crate::auth::password::{hash_password, validate_password};
use crate::auth::tokens::generate_token;
use crate::validators::{normalize_email, normalize_mobile, normalize_person_name};

use super::session::storage::{SessionOptions, issue_session};
use super::session::types::{StatusResponse, UserSummary};
use super::users;
use super::{Principal, authenticate};
use storage::{AcceptOutcome, InvitationRow, MembershipRow, MutationOutcome};
use types::{
    AcceptInvitationRequest, InviteTeamMemberRequest, InviteTeamMemberResponse,
    ListMembersResponse, MemberActionRequest, MemberView, MembershipStatus,
    ResendInvitationRequest, TeamRole, UpdateMemberRoleRequest, ValidateInvitationRequest,
    ValidateInvitationResponse,
};

fn member_view(member: &MembershipRow) -> Result<MemberView, ApiError> {
    let role = TeamRole::parse(&member.role)
        .map_err(|_| ApiError::internal(format!("unknown team role {}", member.role)))?;
    let status = MembershipStatus::parse(&member.status)
        .ok_or_else(|| ApiError::internal(format!("unknown status {}", member.status)))?;
    Ok(MemberView {
        membership_id: member.id,
        user_id: member.user_id,
        full_name: member.full_name.clone(),
        email: member.email.clone(),
        phone: member.phone.clone(),
        role,
        status,
        accepted_at: member.accepted_at,
    })
}

/// Gate for admin-only operations: the caller must hold an ACTIVE ADMIN
/// membership in the organization.
async fn require_active_admin(
    pool: &PgPool,
    org_id: i64,
    principal: &Principal,
) -> Result<MembershipRow, ApiError> {
    let membership = storage::caller_membership(pool, org_id, principal.user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::Unauthorized, "Not a member of this organization")
        })?;
    if membership.role == "ADMIN" && membership.status == "ACTIVE" {
        Ok(membership)
    } else {
        Err(ApiError::new(
            ErrorCode::Unauthorized,
            "Only active admins may manage the team",
        ))
    }
}

fn invitation_gate(invitation: &InvitationRow) -> Result<(), ApiError> {
    if invitation.accepted {
        return Err(ApiError::new(
            ErrorCode::AlreadyAccepted,
            "Invitation was already accepted",
        ));
    }
    if invitation.expires_at <= Utc::now() {
        return Err(ApiError::new(
            ErrorCode::InvitationExpired,
            "Invitation has expired; ask for a new one",
        ));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/team/invite",
    request_body = InviteTeamMemberRequest,
    responses(
        (status = 200, description = "Invitation created", body = InviteTeamMemberResponse),
        (status = 403, description = "Caller is not an active admin", body = ApiError),
        (status = 409, description = "Member or pending invitation exists", body = ApiError)
    ),
    tag = "team"
)]
pub async fn invite_team_member(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<InviteTeamMemberRequest>,
) -> Result<Json<InviteTeamMemberResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    require_active_admin(&pool, request.org_id, &principal).await?;

    let role = TeamRole::parse(&request.role)?;
    let email = normalize_email(&request.email)?;
    let mobile = request
        .mobile
        .as_deref()
        .filter(|mobile| !mobile.trim().is_empty())
        .map(normalize_mobile)
        .transpose()?;

    if storage::member_email_exists(&pool, request.org_id, &email)
        .await
        .map_err(ApiError::internal)?
        || storage::pending_invitation_exists(&pool, request.org_id, &email)
            .await
            .map_err(ApiError::internal)?
    {
        return Err(ApiError::new(
            ErrorCode::DuplicateEmail,
            "A member or pending invitation already exists for this email",
        ));
    }

    let raw_token = generate_token().map_err(ApiError::internal)?;
    let (invitation_id, expires_at) = storage::insert_invitation(
        &pool,
        request.org_id,
        &email,
        mobile.as_deref(),
        role.as_str(),
        principal.user_id,
        &raw_token,
    )
    .await
    .map_err(ApiError::internal)?;

    if let Some(mobile) = mobile {
        send_best_effort(
            ctx.sms(),
            SmsMessage::new(
                mobile,
                "You have been invited to join a buyer team on Mandi. Check your email for the invitation link.",
            ),
        )
        .await;
    }

    Ok(Json(InviteTeamMemberResponse {
        success: true,
        message: "Invitation created".to_string(),
        invitation_id,
        invitation_token: raw_token,
        expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/team/accept",
    request_body = AcceptInvitationRequest,
    responses(
        (status = 200, description = "Membership activated", body = super::buyer::types::BuyerAuthResponse),
        (status = 412, description = "Invitation expired or consumed", body = ApiError)
    ),
    tag = "team"
)]
pub async fn accept_invitation(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<AcceptInvitationRequest>,
) -> Result<Json<super::buyer::types::BuyerAuthResponse>, ApiError> {
    let invitation = storage::find_invitation_by_token(&pool, request.token.trim())
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::InvitationExpired, "Invitation is not valid")
        })?;
    invitation_gate(&invitation)?;

    let full_name = normalize_person_name(&request.full_name)?;
    let policy = validate_password(&request.password);
    if !policy.is_acceptable() {
        return Err(
            ApiError::new(ErrorCode::WeakPassword, "Password does not meet the policy")
                .with_failed_rules(policy.failed_rules.into_iter().map(str::to_string).collect()),
        );
    }
    let password_hash = hash_password(&request.password).map_err(ApiError::internal)?;

    let user_id = match storage::accept_invitation(&pool, &invitation, &full_name, &password_hash)
        .await
        .map_err(ApiError::internal)?
    {
        AcceptOutcome::Created { user_id } => user_id,
        AcceptOutcome::EmailTaken => {
            return Err(ApiError::new(
                ErrorCode::EmailExists,
                "An account with this email already exists",
            ));
        }
        AcceptOutcome::AlreadyAccepted => {
            return Err(ApiError::new(
                ErrorCode::AlreadyAccepted,
                "Invitation was already accepted",
            ));
        }
    };

    let options = SessionOptions::multi_device()
        .with_buyer_org(Some(invitation.org_id))
        .with_client(
            super::extract_client_ip(&headers),
            super::extract_user_agent(&headers),
        );
    let pair = issue_session(&pool, ctx.jwt_secret(), user_id, Role::Buyer, options)
        .await
        .map_err(ApiError::internal)?;
    users::touch_last_login(&pool, user_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(super::buyer::types::BuyerAuthResponse {
        success: true,
        message: "Invitation accepted".to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
        buyer_org_id: invitation.org_id,
        user: UserSummary {
            user_id,
            user_type: Role::Buyer,
            phone: invitation.mobile.clone(),
            email: Some(invitation.email.clone()),
            full_name: Some(full_name),
            language: "en".to_string(),
        },
    }))
}

#[utoipa::path(
    post,
    path = "/v1/team/invite/validate",
    request_body = ValidateInvitationRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidateInvitationResponse)
    ),
    tag = "team"
)]
pub async fn validate_invitation_token(
    pool: Extension<PgPool>,
    Json(request): Json<ValidateInvitationRequest>,
) -> Result<Json<ValidateInvitationResponse>, ApiError> {
    let invalid = ValidateInvitationResponse {
        valid: false,
        org_id: None,
        email: None,
        business_name: None,
        expires_at: None,
    };

    let Some(invitation) = storage::find_invitation_by_token(&pool, request.token.trim())
        .await
        .map_err(ApiError::internal)?
    else {
        return Ok(Json(invalid));
    };
    if invitation.accepted || invitation.expires_at <= Utc::now() {
        return Ok(Json(invalid));
    }

    Ok(Json(ValidateInvitationResponse {
        valid: true,
        org_id: Some(invitation.org_id),
        email: Some(invitation.email),
        business_name: invitation.business_name,
        expires_at: Some(invitation.expires_at),
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListMembersQuery {
    pub org_id: i64,
    pub role: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/team/members",
    params(ListMembersQuery),
    responses(
        (status = 200, description = "Members matching the filters", body = ListMembersResponse),
        (status = 403, description = "Caller is not a member", body = ApiError)
    ),
    tag = "team"
)]
pub async fn list_team_members(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Query(query): Query<ListMembersQuery>,
) -> Result<Json<ListMembersResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    // A token already bound to this organization proves membership; anyone
    // else is checked against the membership table.
    if principal.buyer_org_id != Some(query.org_id) {
        storage::caller_membership(&pool, query.org_id, principal.user_id)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| {
                ApiError::new(ErrorCode::Unauthorized, "Not a member of this organization")
            })?;
    }

    let role = query
        .role
        .as_deref()
        .map(|raw| TeamRole::parse(raw).map(TeamRole::as_str))
        .transpose()?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            MembershipStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid("Unknown membership status"))?
                .as_str(),
        ),
        None => None,
    };
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty());
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 50);

    let (members, total) =
        storage::list_members(&pool, query.org_id, role, status, search, page, limit)
            .await
            .map_err(ApiError::internal)?;
    let members = members
        .iter()
        .map(member_view)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ListMembersResponse {
        success: true,
        page,
        limit,
        total,
        members,
    }))
}

fn mutation_response(outcome: MutationOutcome, done_message: &str) -> Result<StatusResponse, ApiError> {
    match outcome {
        MutationOutcome::Done => Ok(StatusResponse {
            success: true,
            message: done_message.to_string(),
        }),
        MutationOutcome::NotFound => Err(ApiError::new(
            ErrorCode::PhoneNotRegistered,
            "No such member in this organization",
        )),
        MutationOutcome::LastAdmin => Err(ApiError::new(
            ErrorCode::LastAdmin,
            "An organization must keep at least one active admin",
        )),
        MutationOutcome::SelfAction => Err(ApiError::new(
            ErrorCode::SelfAction,
            "You cannot perform this action on yourself",
        )),
    }
}

#[utoipa::path(
    post,
    path = "/v1/team/members/role",
    request_body = UpdateMemberRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = StatusResponse),
        (status = 412, description = "Last-admin guard tripped", body = ApiError)
    ),
    tag = "team"
)]
pub async fn update_member_role(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<UpdateMemberRoleRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    require_active_admin(&pool, request.org_id, &principal).await?;
    let new_role = TeamRole::parse(&request.new_role)?;

    let outcome = storage::update_member_role(
        &pool,
        request.org_id,
        request.member_id,
        new_role.as_str(),
        principal.user_id,
        request.reason.as_deref().map(str::trim),
    )
    .await
    .map_err(ApiError::internal)?;
    Ok(Json(mutation_response(outcome, "Role updated")?))
}

#[utoipa::path(
    post,
    path = "/v1/team/members/deactivate",
    request_body = MemberActionRequest,
    responses(
        (status = 200, description = "Member deactivated", body = StatusResponse),
        (status = 400, description = "Self-deactivation refused", body = ApiError),
        (status = 412, description = "Last-admin guard tripped", body = ApiError)
    ),
    tag = "team"
)]
pub async fn deactivate_team_member(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<MemberActionRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    require_active_admin(&pool, request.org_id, &principal).await?;

    let outcome = storage::deactivate_member(
        &pool,
        request.org_id,
        request.member_id,
        principal.user_id,
    )
    .await
    .map_err(ApiError::internal)?;
    Ok(Json(mutation_response(outcome, "Member deactivated")?))
}

#[utoipa::path(
    post,
    path = "/v1/team/members/delete",
    request_body = MemberActionRequest,
    responses(
        (status = 200, description = "Member removed", body = StatusResponse),
        (status = 400, description = "Self-deletion refused", body = ApiError),
        (status = 412, description = "Last-admin guard tripped", body = ApiError)
    ),
    tag = "team"
)]
pub async fn delete_team_member(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<MemberActionRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    require_active_admin(&pool, request.org_id, &principal).await?;

    let outcome =
        storage::delete_member(&pool, request.org_id, request.member_id, principal.user_id)
            .await
            .map_err(ApiError::internal)?;
    Ok(Json(mutation_response(outcome, "Member removed")?))
}

#[utoipa::path(
    post,
    path = "/v1/team/invite/resend",
    request_body = ResendInvitationRequest,
    responses(
        (status = 200, description = "Invitation re-armed", body = InviteTeamMemberResponse),
        (status = 404, description = "No such invitation", body = ApiError)
    ),
    tag = "team"
)]
pub async fn resend_invitation(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
    Json(request): Json<ResendInvitationRequest>,
) -> Result<Json<InviteTeamMemberResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    require_active_admin(&pool, request.org_id, &principal).await?;

    let raw_token = generate_token().map_err(ApiError::internal)?;
    let Some((_email, expires_at)) =
        storage::resend_invitation(&pool, request.org_id, request.invitation_id, &raw_token)
            .await
            .map_err(ApiError::internal)?
    else {
        return Err(ApiError::new(
            ErrorCode::RegistrationNotFound,
            "No such invitation",
        ));
    };

    Ok(Json(InviteTeamMemberResponse {
        success: true,
        message: "Invitation re-sent".to_string(),
        invitation_id: request.invitation_id,
        invitation_token: raw_token,
        expires_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn invitation(accepted: bool, expired: bool) -> InvitationRow {
        InvitationRow {
            id: 1,
            org_id: 11,
            email: "new@agro.example".to_string(),
            mobile: None,
            token_hash: "$2b$12$hash".to_string(),
            expires_at: if expired {
                Utc::now() - ChronoDuration::hours(1)
            } else {
                Utc::now() + ChronoDuration::hours(23)
            },
            accepted,
            business_name: Some("Agro Traders".to_string()),
        }
    }

    #[test]
    fn gate_passes_live_invitations() {
        assert!(invitation_gate(&invitation(false, false)).is_ok());
    }

    #[test]
    fn gate_rejects_accepted_then_expired() {
        let err = invitation_gate(&invitation(true, false)).err().expect("accepted");
        assert_eq!(err.code, ErrorCode::AlreadyAccepted);

        let err = invitation_gate(&invitation(false, true)).err().expect("expired");
        assert_eq!(err.code, ErrorCode::InvitationExpired);
    }

    #[test]
    fn mutation_outcomes_map_to_codes() {
        assert!(mutation_response(MutationOutcome::Done, "ok").is_ok());
        assert_eq!(
            mutation_response(MutationOutcome::LastAdmin, "ok")
                .err()
                .expect("last admin")
                .code,
            ErrorCode::LastAdmin
        );
        assert_eq!(
            mutation_response(MutationOutcome::SelfAction, "ok")
                .err()
                .expect("self")
                .code,
            ErrorCode::SelfAction
        );
    }
}
