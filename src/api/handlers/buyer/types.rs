//! Request/response types for buyer registration and login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::session::types::UserSummary;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBuyerRequest {
    pub email: String,
    pub password: String,
    pub phone: String,
    pub full_name: String,
    pub business_name: String,
    pub business_type: String,
    #[serde(default)]
    pub gst_number: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBuyerResponse {
    pub success: bool,
    pub message: String,
    pub expires_in: u32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBuyerOtpRequest {
    pub phone: String,
    pub otp: String,
    pub address_line: String,
    pub city: String,
    #[serde(default)]
    pub district: Option<String>,
    pub state: String,
    pub pincode: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BuyerAuthResponse {
    pub success: bool,
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub buyer_org_id: i64,
    pub user: UserSummary,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginBuyerRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Pending registration bundle persisted in the key-value store between the
/// two phases. Only the password hash ever enters the bundle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingBuyerRegistration {
    pub(crate) email: String,
    pub(crate) phone: String,
    pub(crate) password_hash: String,
    pub(crate) full_name: String,
    pub(crate) business_name: String,
    pub(crate) business_type: String,
    pub(crate) gst_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_bundle_round_trips_json() -> anyhow::Result<()> {
        let bundle = PendingBuyerRegistration {
            email: "owner@agro.example".to_string(),
            phone: "9876543210".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            full_name: "Meera Shah".to_string(),
            business_name: "Agro Traders".to_string(),
            business_type: "WHOLESALER".to_string(),
            gst_number: None,
        };
        let json = serde_json::to_string(&bundle)?;
        let decoded: PendingBuyerRegistration = serde_json::from_str(&json)?;
        assert_eq!(decoded, bundle);
        Ok(())
    }
}
