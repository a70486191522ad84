//! Request/response types for field-agent provisioning and login.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::validators::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Training,
    Active,
    Inactive,
}

impl AgentStatus {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "TRAINING" => Some(Self::Training),
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "TRAINING",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
}

impl EmploymentType {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "FULL_TIME" => Ok(Self::FullTime),
            "PART_TIME" => Ok(Self::PartTime),
            "CONTRACT" => Ok(Self::Contract),
            _ => Err(FieldError {
                message: "Unknown employment type",
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullTime => "FULL_TIME",
            Self::PartTime => "PART_TIME",
            Self::Contract => "CONTRACT",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: String,
    pub mobile: String,
    pub zone_id: i64,
    pub start_date: String,
    pub employment_type: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentResponse {
    pub success: bool,
    pub message: String,
    pub agent_id: i64,
    pub employee_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FirstLoginRequest {
    pub mobile: String,
    pub temp_pin: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FirstLoginResponse {
    pub success: bool,
    pub message: String,
    pub requires_pin_change: bool,
    pub temporary_token: String,
    pub expires_in: u32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgentSetPinRequest {
    pub temporary_token: String,
    pub new_pin: String,
    pub confirm_pin: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgentSetPinResponse {
    pub success: bool,
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub requires_training: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTrainingRequest {
    pub user_id: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTrainingResponse {
    pub success: bool,
    pub message: String,
    pub already_completed: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateAgentRequest {
    pub agent_id: i64,
    pub reason: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReassignZoneRequest {
    pub agent_id: i64,
    pub new_zone_id: i64,
    #[serde(default)]
    pub effective_from: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub user_id: i64,
    pub employee_id: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub status: AgentStatus,
    pub employment_type: String,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsResponse {
    pub success: bool,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub agents: Vec<AgentView>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetailsResponse {
    pub success: bool,
    pub agent: AgentView,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgentDashboardResponse {
    pub success: bool,
    pub agent: AgentView,
    pub requires_training: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_round_trips() {
        for status in [AgentStatus::Training, AgentStatus::Active, AgentStatus::Inactive] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("RETIRED"), None);
    }

    #[test]
    fn employment_type_closed_set() {
        assert_eq!(EmploymentType::parse("full_time"), Ok(EmploymentType::FullTime));
        assert!(EmploymentType::parse("GIG").is_err());
    }
}
