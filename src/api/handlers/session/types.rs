//! Request/response types for login and session endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RequestLoginOtpRequest {
    pub phone: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OtpIssuedResponse {
    pub success: bool,
    pub message: String,
    pub expires_in: u32,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLoginOtpRequest {
    pub phone: String,
    pub otp: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PinLoginRequest {
    pub phone: String,
    pub pin: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: i64,
    pub user_type: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub language: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserSummary,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<Role>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_fields_are_camel_case() -> anyhow::Result<()> {
        let request: VerifyLoginOtpRequest = serde_json::from_value(serde_json::json!({
            "phone": "9876543210",
            "otp": "123456",
            "deviceId": "D1"
        }))?;
        assert_eq!(request.device_id.as_deref(), Some("D1"));

        let response = VerifyTokenResponse {
            valid: true,
            user_id: Some(7),
            user_type: Some(Role::Farmer),
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["userId"], 7);
        assert_eq!(value["userType"], "FARMER");
        Ok(())
    }

    #[test]
    fn verify_response_omits_empty_fields() -> anyhow::Result<()> {
        let response = VerifyTokenResponse {
            valid: false,
            user_id: None,
            user_type: None,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["valid"], false);
        assert!(value.get("userId").is_none());
        Ok(())
    }
}
