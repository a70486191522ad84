//! Request/response types for hauler registration and verification.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::validators::FieldError;

/// Hauler verification lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    InProgress,
    PendingVerification,
    Active,
    Rejected,
}

impl VerificationStatus {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "IN_PROGRESS" => Some(Self::InProgress),
            "PENDING_VERIFICATION" => Some(Self::PendingVerification),
            "ACTIVE" => Some(Self::Active),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::PendingVerification => "PENDING_VERIFICATION",
            Self::Active => "ACTIVE",
            Self::Rejected => "REJECTED",
        }
    }
}

/// Document kinds captured during registration steps 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    VehiclePhotoFront,
    VehiclePhotoSide,
    VehiclePhotoOther,
    DlFront,
    DlBack,
}

impl DocumentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VehiclePhotoFront => "VEHICLE_PHOTO_FRONT",
            Self::VehiclePhotoSide => "VEHICLE_PHOTO_SIDE",
            Self::VehiclePhotoOther => "VEHICLE_PHOTO_OTHER",
            Self::DlFront => "DL_FRONT",
            Self::DlBack => "DL_BACK",
        }
    }
}

/// Admin decision on a pending hauler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyAction {
    Approve,
    Reject,
}

impl VerifyAction {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            _ => Err(FieldError {
                message: "Action must be APPROVE or REJECT",
            }),
        }
    }
}

/// Step-1 carrier parked in the key-value store under the registration token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingHaulerRegistration {
    pub(crate) full_name: String,
    pub(crate) phone: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Step1Request {
    pub name: String,
    pub mobile: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Step1Response {
    pub success: bool,
    pub message: String,
    pub registration_token: String,
    pub expires_in: u32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HaulerVerifyOtpRequest {
    pub registration_token: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub success: bool,
    pub message: String,
    pub current_step: i32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfoRequest {
    pub registration_token: String,
    pub vehicle_type: String,
    pub vehicle_number: String,
    pub payload_capacity_kg: f64,
    pub photo_front_url: String,
    pub photo_side_url: String,
    #[serde(default)]
    pub photo_other_url: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfoRequest {
    pub registration_token: String,
    pub dl_number: String,
    pub dl_expiry: String,
    pub dl_front_url: String,
    pub dl_back_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfoRequest {
    pub registration_token: String,
    pub upi_id: String,
    #[serde(default)]
    pub bank_account: Option<String>,
    #[serde(default)]
    pub ifsc: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub registration_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    pub verification_status: VerificationStatus,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub doc_type: String,
    pub storage_url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PendingHaulerView {
    pub hauler_id: i64,
    pub user_id: i64,
    pub full_name: Option<String>,
    pub phone: String,
    pub vehicle_type: Option<String>,
    pub vehicle_number: String,
    pub payload_capacity_kg: Option<f64>,
    /// Masked for display; storage keeps the full value.
    pub dl_number: Option<String>,
    pub dl_expiry: Option<NaiveDate>,
    pub district: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub documents: Vec<DocumentView>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerificationsResponse {
    pub success: bool,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub haulers: Vec<PendingHaulerView>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyHaulerRequest {
    pub hauler_id: i64,
    pub action: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEligibilityEntry {
    pub vehicle_type: String,
    pub max_capacity_kg: u32,
    pub max_radius_km: u32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEligibilityResponse {
    pub success: bool,
    pub vehicles: Vec<VehicleEligibilityEntry>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HaulerProfileResponse {
    pub success: bool,
    pub hauler_id: i64,
    pub full_name: Option<String>,
    pub phone: String,
    pub current_step: i32,
    pub verification_status: VerificationStatus,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
    pub payload_capacity_kg: Option<f64>,
    /// Masked for display.
    pub dl_number: Option<String>,
    pub dl_expiry: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub documents: Vec<DocumentView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_status_round_trips() {
        for status in [
            VerificationStatus::InProgress,
            VerificationStatus::PendingVerification,
            VerificationStatus::Active,
            VerificationStatus::Rejected,
        ] {
            assert_eq!(VerificationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VerificationStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn verify_action_parses_loosely() {
        assert_eq!(VerifyAction::parse(" approve "), Ok(VerifyAction::Approve));
        assert_eq!(VerifyAction::parse("REJECT"), Ok(VerifyAction::Reject));
        assert!(VerifyAction::parse("DELETE").is_err());
    }
}
