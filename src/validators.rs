//! Pure field validators for onboarding and login flows.
//!
//! Every function is deterministic, takes raw client input, and returns the
//! normalized value or a typed failure. Persistence always stores the
//! normalized form; display formatting stays in the handlers.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Typed validation failure with a client-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FieldError {
    pub message: &'static str,
}

impl FieldError {
    const fn new(message: &'static str) -> Self {
        Self { message }
    }
}

pub type FieldResult = Result<String, FieldError>;

/// Normalize an Indian mobile number: strip non-digits, keep the last ten.
/// Accepts numbers starting 6-9 only.
pub fn normalize_mobile(input: &str) -> FieldResult {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    let last_ten = if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    };
    if Regex::new(r"^[6-9][0-9]{9}$").is_ok_and(|re| re.is_match(&last_ten)) {
        Ok(last_ten)
    } else {
        Err(FieldError::new("Invalid mobile number"))
    }
}

/// Normalize an email for lookup/uniqueness checks.
pub fn normalize_email(input: &str) -> FieldResult {
    let email = input.trim().to_lowercase();
    if Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").is_ok_and(|re| re.is_match(&email)) {
        Ok(email)
    } else {
        Err(FieldError::new("Invalid email address"))
    }
}

/// Validate a GST registration number (uppercased first).
pub fn normalize_gst(input: &str) -> FieldResult {
    let gst = input.trim().to_uppercase();
    if Regex::new(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$")
        .is_ok_and(|re| re.is_match(&gst))
    {
        Ok(gst)
    } else {
        Err(FieldError::new("Invalid GST number"))
    }
}

/// Validate a UPI virtual payment address, lowercased.
pub fn normalize_upi_vpa(input: &str) -> FieldResult {
    let vpa = input.trim().to_lowercase();
    if Regex::new(r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9]+$").is_ok_and(|re| re.is_match(&vpa)) {
        Ok(vpa)
    } else {
        Err(FieldError::new("Invalid UPI id"))
    }
}

/// Validate an IFSC code (uppercased first).
pub fn normalize_ifsc(input: &str) -> FieldResult {
    let ifsc = input.trim().to_uppercase();
    if Regex::new(r"^[A-Z]{4}0[A-Z0-9]{6}$").is_ok_and(|re| re.is_match(&ifsc)) {
        Ok(ifsc)
    } else {
        Err(FieldError::new("Invalid IFSC code"))
    }
}

/// Normalize a vehicle registration: uppercase, collapse spaces/dots/repeated
/// hyphens into single hyphens, then match `SS-DD-L{1,2}-DDDD`.
pub fn normalize_vehicle_number(input: &str) -> FieldResult {
    let upper = input.trim().to_uppercase();
    let collapsed = Regex::new(r"[\s.\-]+")
        .map(|re| re.replace_all(&upper, "-").into_owned())
        .unwrap_or(upper);
    if Regex::new(r"^[A-Z]{2}-[0-9]{2}-[A-Z]{1,2}-[0-9]{4}$")
        .is_ok_and(|re| re.is_match(&collapsed))
    {
        Ok(collapsed)
    } else {
        Err(FieldError::new("Invalid vehicle registration number"))
    }
}

// State RTO formats vary; these cover the issuing patterns we accept today.
const DL_PATTERNS: [&str; 3] = [
    r"^[A-Z]{2}[0-9]{13}$",
    r"^[A-Z]{2}-[0-9]{13}$",
    r"^[A-Z]{2}[0-9]{2}-[0-9]{4}-[0-9]{7}$",
];

/// Normalize a driving licence number: uppercase, strip whitespace, accept if
/// any state pattern matches.
pub fn normalize_dl_number(input: &str) -> FieldResult {
    let dl: String = input
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let matched = DL_PATTERNS
        .iter()
        .any(|pattern| Regex::new(pattern).is_ok_and(|re| re.is_match(&dl)));
    if matched {
        Ok(dl)
    } else {
        Err(FieldError::new("Invalid driving licence number"))
    }
}

/// Parse a DL expiry date (`YYYY-MM-DD`) and require it strictly after `today`.
pub fn parse_dl_expiry(input: &str, today: NaiveDate) -> Result<NaiveDate, FieldError> {
    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| FieldError::new("Driving licence expiry must be YYYY-MM-DD"))?;
    if date > today {
        Ok(date)
    } else {
        Err(FieldError::new("Driving licence has expired"))
    }
}

/// `parse_dl_expiry` against the local calendar date.
pub fn parse_dl_expiry_now(input: &str) -> Result<NaiveDate, FieldError> {
    parse_dl_expiry(input, chrono::Local::now().date_naive())
}

/// Vehicle classes eligible for hauler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Bike,
    Auto,
    PickupVan,
    SmallTruck,
}

impl VehicleType {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "BIKE" => Ok(Self::Bike),
            "AUTO" => Ok(Self::Auto),
            "PICKUP_VAN" => Ok(Self::PickupVan),
            "SMALL_TRUCK" => Ok(Self::SmallTruck),
            _ => Err(FieldError::new("Unknown vehicle type")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bike => "BIKE",
            Self::Auto => "AUTO",
            Self::PickupVan => "PICKUP_VAN",
            Self::SmallTruck => "SMALL_TRUCK",
        }
    }

    /// Maximum payload in kilograms for the class.
    #[must_use]
    pub const fn max_capacity_kg(self) -> u32 {
        match self {
            Self::Bike => 20,
            Self::Auto => 100,
            Self::PickupVan => 500,
            Self::SmallTruck => 2000,
        }
    }

    /// Maximum service radius in kilometres for the class.
    #[must_use]
    pub const fn max_radius_km(self) -> u32 {
        match self {
            Self::Bike => 10,
            Self::Auto => 30,
            Self::PickupVan => 80,
            Self::SmallTruck => 150,
        }
    }

    pub const ALL: [Self; 4] = [Self::Bike, Self::Auto, Self::PickupVan, Self::SmallTruck];
}

/// Check a declared payload capacity against the class limit.
pub fn check_payload_capacity(vehicle_type: VehicleType, capacity_kg: f64) -> Result<(), FieldError> {
    if capacity_kg <= 0.0 {
        return Err(FieldError::new("Payload capacity must be positive"));
    }
    if capacity_kg > f64::from(vehicle_type.max_capacity_kg()) {
        return Err(FieldError::new(
            "Payload capacity exceeds the limit for this vehicle type",
        ));
    }
    Ok(())
}

/// Closed set of buyer business types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessType {
    Retailer,
    Wholesaler,
    Processor,
    Exporter,
    Restaurant,
}

impl BusinessType {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "RETAILER" => Ok(Self::Retailer),
            "WHOLESALER" => Ok(Self::Wholesaler),
            "PROCESSOR" => Ok(Self::Processor),
            "EXPORTER" => Ok(Self::Exporter),
            "RESTAURANT" => Ok(Self::Restaurant),
            _ => Err(FieldError::new("Unknown business type")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retailer => "RETAILER",
            Self::Wholesaler => "WHOLESALER",
            Self::Processor => "PROCESSOR",
            Self::Exporter => "EXPORTER",
            Self::Restaurant => "RESTAURANT",
        }
    }
}

/// Farm size buckets recorded on the farmer profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FarmSize {
    Small,
    Medium,
    Large,
}

impl FarmSize {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        match input.trim().to_uppercase().as_str() {
            "SMALL" => Ok(Self::Small),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            _ => Err(FieldError::new("Unknown farm size")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
        }
    }
}

/// Require a trimmed display name of at least two characters.
pub fn normalize_person_name(input: &str) -> FieldResult {
    let name = input.trim().to_string();
    if name.chars().count() >= 2 {
        Ok(name)
    } else {
        Err(FieldError::new("Name must be at least 2 characters"))
    }
}

/// Mask a driving licence for display: first two and last four kept.
/// Storage keeps the full value; only projections use this.
#[must_use]
pub fn mask_dl_number(dl: &str) -> String {
    let chars: Vec<char> = dl.chars().collect();
    if chars.len() < 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn mobile_strips_country_code_and_punctuation() {
        assert_eq!(
            normalize_mobile("+91 98765-43210"),
            Ok("9876543210".to_string())
        );
        assert_eq!(normalize_mobile("09876543210"), Ok("9876543210".to_string()));
    }

    #[test]
    fn mobile_rejects_bad_leading_digit_and_length() {
        assert!(normalize_mobile("5876543210").is_err());
        assert!(normalize_mobile("98765").is_err());
        assert!(normalize_mobile("").is_err());
    }

    #[test]
    fn email_case_folds() {
        assert_eq!(
            normalize_email(" Ravi@Example.COM "),
            Ok("ravi@example.com".to_string())
        );
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("a@b").is_err());
    }

    #[test]
    fn gst_uppercases_and_matches_checksum_shape() {
        assert_eq!(
            normalize_gst("29abcde1234f1z5"),
            Ok("29ABCDE1234F1Z5".to_string())
        );
        assert!(normalize_gst("29ABCDE1234F105").is_err());
    }

    #[test]
    fn upi_vpa_lowercases() {
        assert_eq!(normalize_upi_vpa("Ravi.K@OKSBI"), Ok("ravi.k@oksbi".to_string()));
        assert!(normalize_upi_vpa("ravi@").is_err());
        assert!(normalize_upi_vpa("@oksbi").is_err());
    }

    #[test]
    fn ifsc_shape() {
        assert_eq!(normalize_ifsc("sbin0001234"), Ok("SBIN0001234".to_string()));
        assert!(normalize_ifsc("SBIN1001234").is_err());
        assert!(normalize_ifsc("SB0001234").is_err());
    }

    #[test]
    fn vehicle_number_collapses_separators() {
        assert_eq!(
            normalize_vehicle_number("ka 01.ab--1234"),
            Ok("KA-01-AB-1234".to_string())
        );
        assert_eq!(
            normalize_vehicle_number("KA-01-A-1234"),
            Ok("KA-01-A-1234".to_string())
        );
        assert!(normalize_vehicle_number("KA01AB1234").is_err());
        assert!(normalize_vehicle_number("K-01-AB-1234").is_err());
    }

    #[test]
    fn dl_number_accepts_state_patterns() {
        assert_eq!(
            normalize_dl_number("ka05 2015 0012345"),
            Ok("KA0520150012345".to_string())
        );
        assert_eq!(
            normalize_dl_number("MH-1420110012345"),
            Ok("MH-1420110012345".to_string())
        );
        assert_eq!(
            normalize_dl_number("TN99-2020-0012345"),
            Ok("TN99-2020-0012345".to_string())
        );
        assert!(normalize_dl_number("12345").is_err());
    }

    #[test]
    fn dl_expiry_must_be_future() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(parse_dl_expiry("2026-01-01", today).is_ok());
        assert!(parse_dl_expiry("2025-06-01", today).is_err());
        assert!(parse_dl_expiry("2024-12-31", today).is_err());
        assert!(parse_dl_expiry("2025-02-30", today).is_err());
        assert!(parse_dl_expiry("01/01/2030", today).is_err());
    }

    #[test]
    fn payload_capacity_per_class() {
        assert!(check_payload_capacity(VehicleType::Bike, 18.0).is_ok());
        assert!(check_payload_capacity(VehicleType::Bike, 25.0).is_err());
        assert!(check_payload_capacity(VehicleType::SmallTruck, 2000.0).is_ok());
        assert!(check_payload_capacity(VehicleType::SmallTruck, 2000.5).is_err());
        assert!(check_payload_capacity(VehicleType::Auto, 0.0).is_err());
        assert!(check_payload_capacity(VehicleType::Auto, -5.0).is_err());
    }

    #[test]
    fn vehicle_type_limits_match_eligibility_table() {
        assert_eq!(VehicleType::Bike.max_capacity_kg(), 20);
        assert_eq!(VehicleType::Bike.max_radius_km(), 10);
        assert_eq!(VehicleType::Auto.max_capacity_kg(), 100);
        assert_eq!(VehicleType::Auto.max_radius_km(), 30);
        assert_eq!(VehicleType::PickupVan.max_capacity_kg(), 500);
        assert_eq!(VehicleType::PickupVan.max_radius_km(), 80);
        assert_eq!(VehicleType::SmallTruck.max_capacity_kg(), 2000);
        assert_eq!(VehicleType::SmallTruck.max_radius_km(), 150);
    }

    #[test]
    fn business_type_closed_set() {
        assert_eq!(BusinessType::parse("wholesaler"), Ok(BusinessType::Wholesaler));
        assert!(BusinessType::parse("SOMETHING_ELSE").is_err());
    }

    #[test]
    fn farm_size_closed_set() {
        assert_eq!(FarmSize::parse("small"), Ok(FarmSize::Small));
        assert!(FarmSize::parse("TINY").is_err());
    }

    #[test]
    fn person_name_minimum_length() {
        assert_eq!(normalize_person_name("  Ravi "), Ok("Ravi".to_string()));
        assert!(normalize_person_name("R").is_err());
        assert!(normalize_person_name("   ").is_err());
    }

    #[test]
    fn dl_masking_keeps_prefix_and_suffix() {
        assert_eq!(mask_dl_number("KA0520150012345"), "KA****2345");
        assert_eq!(mask_dl_number("AB12"), "****");
    }
}
