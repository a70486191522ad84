//! Access PIN rules: 4-digit permanent PINs and 6-digit temporary PINs.

use anyhow::{Context, Result};
use rand::{Rng, rngs::OsRng};

// 0123..6789 ascending plus their reverses.
const SEQUENTIAL_PATTERNS: [&str; 14] = [
    "0123", "1234", "2345", "3456", "4567", "5678", "6789", "3210", "4321", "5432", "6543",
    "7654", "8765", "9876",
];

const BCRYPT_COST: u32 = 12;

/// Why a candidate PIN was rejected. `code` is the machine-readable reason
/// surfaced in error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("PIN must be exactly 4 digits")]
    Length,
    #[error("PIN must not be a sequential pattern")]
    Sequential,
    #[error("PIN must not repeat a single digit")]
    Repeated,
}

impl PinError {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Length => "LENGTH",
            Self::Sequential => "SEQUENTIAL",
            Self::Repeated => "REPEATED",
        }
    }
}

/// Validate a permanent 4-digit PIN against the weak-pattern rules.
pub fn validate_permanent_pin(pin: &str) -> Result<(), PinError> {
    if pin.len() != 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PinError::Length);
    }
    if SEQUENTIAL_PATTERNS.contains(&pin) {
        return Err(PinError::Sequential);
    }
    let mut chars = pin.chars();
    let first = chars.next();
    if chars.all(|c| Some(c) == first) {
        return Err(PinError::Repeated);
    }
    Ok(())
}

/// Require a well-formed 6-digit temporary PIN.
#[must_use]
pub fn valid_temp_pin_format(pin: &str) -> bool {
    pin.len() == 6 && pin.chars().all(|c| c.is_ascii_digit())
}

/// Draw a temporary 6-digit PIN uniformly from the full range.
#[must_use]
pub fn generate_temp_pin() -> String {
    let value: u32 = OsRng.gen_range(100_000..=999_999);
    value.to_string()
}

/// Hash a PIN for storage. Same adaptive hash as passwords.
///
/// # Errors
/// Returns an error if the hashing backend fails.
pub fn hash_pin(pin: &str) -> Result<String> {
    bcrypt::hash(pin, BCRYPT_COST).context("failed to hash PIN")
}

/// Verify a candidate PIN against a stored hash.
#[must_use]
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    bcrypt::verify(pin, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sequential_patterns_and_reverses() {
        assert_eq!(validate_permanent_pin("1234"), Err(PinError::Sequential));
        assert_eq!(validate_permanent_pin("6789"), Err(PinError::Sequential));
        assert_eq!(validate_permanent_pin("3210"), Err(PinError::Sequential));
        assert_eq!(validate_permanent_pin("9876"), Err(PinError::Sequential));
    }

    #[test]
    fn rejects_repeated_digits() {
        for digit in 0..=9u8 {
            let pin = digit.to_string().repeat(4);
            assert_eq!(validate_permanent_pin(&pin), Err(PinError::Repeated));
        }
    }

    #[test]
    fn rejects_wrong_shape() {
        assert_eq!(validate_permanent_pin("123"), Err(PinError::Length));
        assert_eq!(validate_permanent_pin("12345"), Err(PinError::Length));
        assert_eq!(validate_permanent_pin("12a4"), Err(PinError::Length));
    }

    #[test]
    fn accepts_irregular_pins() {
        assert_eq!(validate_permanent_pin("4827"), Ok(()));
        assert_eq!(validate_permanent_pin("1357"), Ok(()));
        assert_eq!(validate_permanent_pin("9021"), Ok(()));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(PinError::Length.code(), "LENGTH");
        assert_eq!(PinError::Sequential.code(), "SEQUENTIAL");
        assert_eq!(PinError::Repeated.code(), "REPEATED");
    }

    #[test]
    fn temp_pin_is_six_digits() {
        for _ in 0..32 {
            let pin = generate_temp_pin();
            assert!(valid_temp_pin_format(&pin), "bad temp pin {pin}");
        }
        assert!(!valid_temp_pin_format("12345"));
        assert!(!valid_temp_pin_format("12345a"));
    }

    #[test]
    fn pin_hash_round_trip() -> anyhow::Result<()> {
        let hash = hash_pin("4827")?;
        assert!(verify_pin("4827", &hash));
        assert!(!verify_pin("4828", &hash));
        Ok(())
    }
}
