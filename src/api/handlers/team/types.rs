//! Request/response types for team membership and invitations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::validators::FieldError;

/// Organization-scoped roles for buyer sub-users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamRole {
    Admin,
    ProcurementManager,
    FinanceUser,
    ReceivingStaff,
}

impl TeamRole {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "PROCUREMENT_MANAGER" => Ok(Self::ProcurementManager),
            "FINANCE_USER" => Ok(Self::FinanceUser),
            "RECEIVING_STAFF" => Ok(Self::ReceivingStaff),
            _ => Err(FieldError {
                message: "Unknown team role",
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::ProcurementManager => "PROCUREMENT_MANAGER",
            Self::FinanceUser => "FINANCE_USER",
            Self::ReceivingStaff => "RECEIVING_STAFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
}

impl MembershipStatus {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Pending => "PENDING",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InviteTeamMemberRequest {
    pub org_id: i64,
    pub email: String,
    #[serde(default)]
    pub mobile: Option<String>,
    pub role: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InviteTeamMemberResponse {
    pub success: bool,
    pub message: String,
    pub invitation_id: i64,
    /// Raw token for delivery to the invitee; only its hashes are stored.
    pub invitation_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub full_name: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateInvitationRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateInvitationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub membership_id: i64,
    pub user_id: i64,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: TeamRole,
    pub status: MembershipStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListMembersResponse {
    pub success: bool,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub members: Vec<MemberView>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRoleRequest {
    pub org_id: i64,
    pub member_id: i64,
    pub new_role: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MemberActionRequest {
    pub org_id: i64,
    pub member_id: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResendInvitationRequest {
    pub org_id: i64,
    pub invitation_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_role_closed_set() {
        assert_eq!(TeamRole::parse("admin"), Ok(TeamRole::Admin));
        assert_eq!(
            TeamRole::parse("procurement_manager"),
            Ok(TeamRole::ProcurementManager)
        );
        assert!(TeamRole::parse("OWNER").is_err());
    }

    #[test]
    fn membership_status_round_trips() {
        for status in [
            MembershipStatus::Active,
            MembershipStatus::Inactive,
            MembershipStatus::Pending,
        ] {
            assert_eq!(MembershipStatus::parse(status.as_str()), Some(status));
        }
    }
}
