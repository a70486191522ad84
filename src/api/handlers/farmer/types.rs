//! Request/response types for farmer onboarding.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::validators::FieldError;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RequestFarmerOtpRequest {
    pub phone: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateFarmerAccountRequest {
    pub phone: String,
    pub otp: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FarmerProfileRequest {
    pub full_name: String,
    pub district: String,
    pub state: String,
    #[serde(default)]
    pub village: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FarmProfileRequest {
    pub farm_size: String,
    #[serde(default)]
    pub farming_types: Vec<String>,
    #[serde(default)]
    pub main_crops: Vec<String>,
    #[serde(default)]
    pub farm_area_acres: Option<f64>,
}

/// Payment rails supported for payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Upi,
    Bank,
}

impl PaymentType {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "UPI" => Ok(Self::Upi),
            "BANK" => Ok(Self::Bank),
            _ => Err(FieldError {
                message: "Unknown payment type",
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upi => "UPI",
            Self::Bank => "BANK",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AddPaymentDetailsRequest {
    pub payment_type: String,
    #[serde(default)]
    pub upi_id: Option<String>,
    #[serde(default)]
    pub bank_account: Option<String>,
    #[serde(default)]
    pub ifsc: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    pub payment_id: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyUpiRequest {
    pub upi_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetPinRequest {
    pub pin: String,
    pub confirm_pin: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_type_parses_closed_set() {
        assert_eq!(PaymentType::parse("upi"), Ok(PaymentType::Upi));
        assert_eq!(PaymentType::parse("BANK"), Ok(PaymentType::Bank));
        assert!(PaymentType::parse("CASH").is_err());
    }

    #[test]
    fn farm_profile_defaults_empty_sets() -> anyhow::Result<()> {
        let request: FarmProfileRequest =
            serde_json::from_value(serde_json::json!({ "farmSize": "SMALL" }))?;
        assert!(request.farming_types.is_empty());
        assert!(request.main_crops.is_empty());
        assert_eq!(request.farm_area_acres, None);
        Ok(())
    }
}
