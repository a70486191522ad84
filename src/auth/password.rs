//! Password hashing and the account password policy.

use anyhow::{Context, Result};
use serde::Serialize;

// Adaptive cost; bumping this only affects newly stored hashes.
const BCRYPT_COST: u32 = 12;

const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Hash a password for storage.
///
/// # Errors
/// Returns an error if the hashing backend fails.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, BCRYPT_COST).context("failed to hash password")
}

/// Verify a candidate against a stored hash. Malformed hashes verify false.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

/// Outcome of the policy check: which rules failed and a UX strength label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub failed_rules: Vec<&'static str>,
    pub strength: PasswordStrength,
}

impl PasswordPolicy {
    /// A password is acceptable only when every rule passes.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        self.failed_rules.is_empty()
    }
}

/// Evaluate the password policy: length >= 8 plus one upper, one lower, one
/// digit, and one special character. Any fully-passing password is `strong`.
#[must_use]
pub fn validate_password(password: &str) -> PasswordPolicy {
    let mut failed_rules = Vec::new();

    if password.chars().count() < 8 {
        failed_rules.push("Must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        failed_rules.push("Must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        failed_rules.push("Must contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        failed_rules.push("Must contain a digit");
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        failed_rules.push("Must contain a special character");
    }

    let strength = match failed_rules.len() {
        0 => PasswordStrength::Strong,
        1 | 2 => PasswordStrength::Medium,
        _ => PasswordStrength::Weak,
    };

    PasswordPolicy {
        failed_rules,
        strength,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptable_password_is_strong() {
        let policy = validate_password("S3cure!pass");
        assert!(policy.is_acceptable());
        assert_eq!(policy.strength, PasswordStrength::Strong);

        let policy = validate_password("Al0ng&StrongPassword");
        assert_eq!(policy.strength, PasswordStrength::Strong);
    }

    #[test]
    fn one_or_two_failures_is_medium() {
        // missing special char
        let policy = validate_password("S3curepass");
        assert!(!policy.is_acceptable());
        assert_eq!(policy.strength, PasswordStrength::Medium);

        // missing digit and special char
        let policy = validate_password("Securepass");
        assert_eq!(policy.failed_rules.len(), 2);
        assert_eq!(policy.strength, PasswordStrength::Medium);
    }

    #[test]
    fn three_failures_is_weak() {
        let policy = validate_password("pass");
        assert!(policy.failed_rules.len() >= 3);
        assert_eq!(policy.strength, PasswordStrength::Weak);
    }

    #[test]
    fn hash_verifies_only_for_original() -> anyhow::Result<()> {
        let hash = hash_password("S3cure!pass")?;
        assert!(verify_password("S3cure!pass", &hash));
        assert!(!verify_password("s3cure!pass", &hash));
        assert!(!verify_password("S3cure!pass", "not-a-bcrypt-hash"));
        Ok(())
    }
}
