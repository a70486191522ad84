//! One-time password engine.
//!
//! Codes are 6 decimal digits from the system CSPRNG. Only the SHA-256 of a
//! code is stored, keyed by scope and phone, with a 10-minute TTL. A fresh
//! generation overwrites any previous hash, so only the most recent code
//! verifies, and verification consumes the key.

use anyhow::Result;
use rand::{Rng, rngs::OsRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::api::sms::{SmsMessage, SmsSender};
use crate::auth::{Role, tokens::sha256_hex};
use crate::kv::{KvStore, otp_key};
use crate::rate_limit::{OtpRateDecision, check_otp_rate};

pub const OTP_TTL: Duration = Duration::from_secs(600);
pub const OTP_TTL_SECONDS: u32 = 600;

/// Key namespace for a code; codes never cross scopes. Scopes follow the
/// actor class, so a farmer's registration and login codes share one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpScope {
    Farmer,
    Buyer,
    Hauler,
    Agent,
    Login,
}

impl OtpScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Buyer => "buyer",
            Self::Hauler => "hauler",
            Self::Agent => "agent",
            Self::Login => "login",
        }
    }

    /// Scope for a login code issued to an existing account.
    #[must_use]
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Farmer => Self::Farmer,
            Role::Buyer => Self::Buyer,
            Role::Hauler => Self::Hauler,
            Role::Agent => Self::Agent,
            Role::Admin => Self::Login,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpIssue {
    /// The raw code is for development logging only and must never be
    /// serialized into a wire response.
    Issued { code: String, sent: bool },
    RateLimited,
}

#[derive(Clone)]
pub struct OtpEngine {
    kv: Arc<dyn KvStore>,
    sms: Arc<dyn SmsSender>,
}

impl OtpEngine {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, sms: Arc<dyn SmsSender>) -> Self {
        Self { kv, sms }
    }

    /// Generate and store a code for `phone`, dispatching it best-effort.
    ///
    /// # Errors
    /// Returns an error only on store failures; SMS failures degrade to
    /// `sent = false` with the stored code still valid.
    pub async fn generate(&self, scope: OtpScope, phone: &str) -> Result<OtpIssue> {
        if check_otp_rate(self.kv.as_ref(), phone).await? == OtpRateDecision::Limited {
            return Ok(OtpIssue::RateLimited);
        }

        let code = generate_code();
        self.kv
            .set_ex(&otp_key(scope.as_str(), phone), &sha256_hex(&code), OTP_TTL)
            .await?;

        let message = SmsMessage::new(
            phone,
            format!("{code} is your Mandi verification code. Valid for 10 minutes."),
        );
        let sent = match self.sms.send(&message).await {
            Ok(()) => true,
            Err(err) => {
                warn!(phone, "otp sms dispatch failed: {err}");
                false
            }
        };

        Ok(OtpIssue::Issued { code, sent })
    }

    /// Compare a candidate against the stored hash; a match consumes the key.
    ///
    /// # Errors
    /// Returns an error only on store failures.
    pub async fn verify(&self, scope: OtpScope, phone: &str, code: &str) -> Result<bool> {
        let key = otp_key(scope.as_str(), phone);
        match self.kv.get(&key).await? {
            Some(stored) if stored == sha256_hex(code.trim()) => {
                self.kv.del(&key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(100_000..=999_999);
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::sms::LogSmsSender;
    use crate::kv::MemoryKv;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct FailingSmsSender;

    #[async_trait]
    impl SmsSender for FailingSmsSender {
        async fn send(&self, _message: &SmsMessage) -> Result<()> {
            Err(anyhow!("gateway down"))
        }
    }

    fn engine(kv: Arc<MemoryKv>) -> OtpEngine {
        OtpEngine::new(kv, Arc::new(LogSmsSender))
    }

    #[tokio::test]
    async fn generate_stores_hash_not_code() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = engine(kv.clone());

        let issue = otp.generate(OtpScope::Farmer, "9876543210").await?;
        let OtpIssue::Issued { code, sent } = issue else {
            panic!("expected issued");
        };
        assert!(sent);
        assert_eq!(code.len(), 6);

        let stored = kv
            .get(&otp_key("farmer", "9876543210"))
            .await?
            .expect("hash stored");
        assert_eq!(stored.len(), 64);
        assert_ne!(stored, code);
        assert_eq!(stored, sha256_hex(&code));
        Ok(())
    }

    #[tokio::test]
    async fn verify_consumes_the_code() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = engine(kv);

        let OtpIssue::Issued { code, .. } = otp.generate(OtpScope::Login, "9876543210").await?
        else {
            panic!("expected issued");
        };

        assert!(!otp.verify(OtpScope::Login, "9876543210", "000000").await?);
        assert!(otp.verify(OtpScope::Login, "9876543210", &code).await?);
        // single use
        assert!(!otp.verify(OtpScope::Login, "9876543210", &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn codes_do_not_cross_scopes() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = engine(kv);
        let OtpIssue::Issued { code, .. } = otp.generate(OtpScope::Buyer, "9876543210").await?
        else {
            panic!("expected issued");
        };
        assert!(!otp.verify(OtpScope::Login, "9876543210", &code).await?);
        assert!(otp.verify(OtpScope::Buyer, "9876543210", &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn fourth_generation_is_rate_limited() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = engine(kv);
        for _ in 0..3 {
            let issue = otp.generate(OtpScope::Login, "9876543210").await?;
            assert!(matches!(issue, OtpIssue::Issued { .. }));
        }
        assert_eq!(
            otp.generate(OtpScope::Login, "9876543210").await?,
            OtpIssue::RateLimited
        );
        Ok(())
    }

    #[tokio::test]
    async fn newest_code_wins() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = engine(kv);
        let OtpIssue::Issued { code: first, .. } =
            otp.generate(OtpScope::Login, "9876543210").await?
        else {
            panic!("expected issued");
        };
        let OtpIssue::Issued { code: second, .. } =
            otp.generate(OtpScope::Login, "9876543210").await?
        else {
            panic!("expected issued");
        };
        if first != second {
            assert!(!otp.verify(OtpScope::Login, "9876543210", &first).await?);
        }
        assert!(otp.verify(OtpScope::Login, "9876543210", &second).await?);
        Ok(())
    }

    #[tokio::test]
    async fn sms_failure_still_issues() -> Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let otp = OtpEngine::new(kv, Arc::new(FailingSmsSender));
        let issue = otp.generate(OtpScope::Hauler, "9876543210").await?;
        let OtpIssue::Issued { code, sent } = issue else {
            panic!("expected issued");
        };
        assert!(!sent);
        assert!(otp.verify(OtpScope::Hauler, "9876543210", &code).await?);
        Ok(())
    }
}
