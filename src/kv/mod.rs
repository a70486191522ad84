//! Ephemeral key-value store port.
//!
//! OTP material, rate-limit counters, lockout markers, and short-lived
//! registration bundles all live here with TTLs. Cross-request coordination
//! relies on the store's atomic increment; nothing in this crate holds
//! cross-request state in process memory.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value` with a TTL, replacing any existing value.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set `key` only if absent; returns whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomic increment; missing keys count from zero. Returns the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Refresh or set the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;
}

// Key layout. Every ephemeral entry is namespaced by concern then subject.

#[must_use]
pub fn otp_key(scope: &str, phone: &str) -> String {
    format!("otp:{scope}:{phone}")
}

#[must_use]
pub fn otp_rate_key(phone: &str) -> String {
    format!("otp:rate:{phone}")
}

#[must_use]
pub fn login_attempts_key(phone: &str) -> String {
    format!("login:attempts:{phone}")
}

#[must_use]
pub fn login_lockout_key(phone: &str) -> String {
    format!("login:lockout:{phone}")
}

#[must_use]
pub fn buyer_registration_key(phone: &str) -> String {
    format!("buyer_reg:{phone}")
}

/// Reservation guard so only one pending registration holds an email.
#[must_use]
pub fn buyer_email_reservation_key(email: &str) -> String {
    format!("buyer_reg:email:{email}")
}

#[must_use]
pub fn hauler_registration_key(token: &str) -> String {
    format!("hauler_reg:{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(otp_key("farmer", "9876543210"), "otp:farmer:9876543210");
        assert_eq!(otp_rate_key("9876543210"), "otp:rate:9876543210");
        assert_eq!(login_attempts_key("9"), "login:attempts:9");
        assert_eq!(login_lockout_key("9"), "login:lockout:9");
        assert_eq!(buyer_registration_key("9"), "buyer_reg:9");
        assert_eq!(
            buyer_email_reservation_key("a@b.example"),
            "buyer_reg:email:a@b.example"
        );
        assert_eq!(hauler_registration_key("t"), "hauler_reg:t");
    }
}
