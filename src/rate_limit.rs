//! OTP request rate limiting and login-failure lockouts.
//!
//! Both engines share the ephemeral store's atomic increment. TTLs are set
//! only by the writer that observes the 0->1 transition, so concurrent
//! requests agree on the window start. Phone-keyed state lives here; the
//! buyer email/password lockout is database-resident (see buyer storage).

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::kv::{KvStore, login_attempts_key, login_lockout_key, otp_rate_key};

/// At most this many OTP generations per phone per window.
pub const OTP_RATE_LIMIT: i64 = 3;
pub const OTP_RATE_WINDOW: Duration = Duration::from_secs(600);

/// Failed verifications before the phone locks, and for how long.
pub const LOGIN_FAILURE_THRESHOLD: i64 = 3;
pub const LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(1800);
pub const LOCKOUT_SECONDS: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpRateDecision {
    Allowed,
    Limited,
}

/// Count an OTP generation attempt for `phone` and decide whether it may
/// proceed. The counter itself is the admission ticket: a limited caller has
/// still consumed nothing beyond the increment.
pub async fn check_otp_rate(kv: &dyn KvStore, phone: &str) -> Result<OtpRateDecision> {
    let key = otp_rate_key(phone);
    let count = kv.incr(&key).await?;
    if count == 1 {
        kv.expire(&key, OTP_RATE_WINDOW).await?;
    }
    if count > OTP_RATE_LIMIT {
        Ok(OtpRateDecision::Limited)
    } else {
        Ok(OtpRateDecision::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still below the threshold; the caller reports attempts left.
    Counted { remaining_attempts: u32 },
    /// Threshold reached; the phone is locked until the given instant.
    Locked { locked_until: DateTime<Utc> },
}

/// Record a failed OTP/PIN verification for `phone`.
pub async fn record_login_failure(kv: &dyn KvStore, phone: &str) -> Result<FailureOutcome> {
    let key = login_attempts_key(phone);
    let count = kv.incr(&key).await?;
    if count == 1 {
        kv.expire(&key, LOGIN_ATTEMPT_WINDOW).await?;
    }
    if count >= LOGIN_FAILURE_THRESHOLD {
        let locked_until = Utc::now() + ChronoDuration::seconds(LOCKOUT_SECONDS);
        kv.set_ex(
            &login_lockout_key(phone),
            &locked_until.to_rfc3339(),
            LOGIN_ATTEMPT_WINDOW,
        )
        .await?;
        Ok(FailureOutcome::Locked { locked_until })
    } else {
        let remaining = u32::try_from(LOGIN_FAILURE_THRESHOLD - count).unwrap_or(0);
        Ok(FailureOutcome::Counted {
            remaining_attempts: remaining,
        })
    }
}

/// Clear both failure keys after a successful verification.
pub async fn clear_login_failures(kv: &dyn KvStore, phone: &str) -> Result<()> {
    kv.del(&login_attempts_key(phone)).await?;
    kv.del(&login_lockout_key(phone)).await?;
    Ok(())
}

/// Return the active lockout deadline for `phone`, if any. Stale markers
/// (past timestamps that outlived their TTL skew) are cleaned up on read.
pub async fn active_lockout(kv: &dyn KvStore, phone: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = kv.get(&login_lockout_key(phone)).await? else {
        return Ok(None);
    };
    let locked_until = DateTime::parse_from_rfc3339(&raw)
        .context("malformed lockout timestamp")?
        .with_timezone(&Utc);
    if locked_until > Utc::now() {
        Ok(Some(locked_until))
    } else {
        clear_login_failures(kv, phone).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::kv::{login_attempts_key, login_lockout_key};

    #[tokio::test]
    async fn otp_rate_allows_three_then_limits() -> Result<()> {
        let kv = MemoryKv::new();
        for _ in 0..3 {
            assert_eq!(
                check_otp_rate(&kv, "9876543210").await?,
                OtpRateDecision::Allowed
            );
        }
        assert_eq!(
            check_otp_rate(&kv, "9876543210").await?,
            OtpRateDecision::Limited
        );
        // other subjects are unaffected
        assert_eq!(
            check_otp_rate(&kv, "9000011111").await?,
            OtpRateDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test]
    async fn third_failure_locks_the_phone() -> Result<()> {
        let kv = MemoryKv::new();
        let phone = "9876543210";

        assert_eq!(
            record_login_failure(&kv, phone).await?,
            FailureOutcome::Counted {
                remaining_attempts: 2
            }
        );
        assert_eq!(
            record_login_failure(&kv, phone).await?,
            FailureOutcome::Counted {
                remaining_attempts: 1
            }
        );
        let third = record_login_failure(&kv, phone).await?;
        let FailureOutcome::Locked { locked_until } = third else {
            panic!("third failure should lock");
        };
        let delta = (locked_until - Utc::now()).num_seconds();
        assert!((1795..=1800).contains(&delta), "lockout window was {delta}s");

        assert_eq!(active_lockout(&kv, phone).await?, Some(locked_until));
        Ok(())
    }

    #[tokio::test]
    async fn success_clears_counters() -> Result<()> {
        let kv = MemoryKv::new();
        let phone = "9876543210";
        record_login_failure(&kv, phone).await?;
        record_login_failure(&kv, phone).await?;
        clear_login_failures(&kv, phone).await?;
        assert_eq!(kv.get(&login_attempts_key(phone)).await?, None);
        assert_eq!(
            record_login_failure(&kv, phone).await?,
            FailureOutcome::Counted {
                remaining_attempts: 2
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_lockout_is_cleared_on_read() -> Result<()> {
        let kv = MemoryKv::new();
        let phone = "9876543210";
        let past = (Utc::now() - ChronoDuration::seconds(5)).to_rfc3339();
        kv.set_ex(&login_lockout_key(phone), &past, LOGIN_ATTEMPT_WINDOW)
            .await?;
        kv.set_ex(&login_attempts_key(phone), "3", LOGIN_ATTEMPT_WINDOW)
            .await?;

        assert_eq!(active_lockout(&kv, phone).await?, None);
        assert_eq!(kv.get(&login_lockout_key(phone)).await?, None);
        assert_eq!(kv.get(&login_attempts_key(phone)).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_lockout_is_an_error() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex(&login_lockout_key("9"), "garbage", LOGIN_ATTEMPT_WINDOW)
            .await?;
        assert!(active_lockout(&kv, "9").await.is_err());
        Ok(())
    }
}
