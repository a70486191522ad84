//! HS256 access and refresh tokens.
//!
//! Tokens are signed with the process-wide service secret. Claims carry the
//! principal id and type plus optional device and organization bindings; the
//! agent pin-change flow uses a short-lived token with a `purpose` claim.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use super::Role;

type HmacSha256 = Hmac<Sha256>;

/// Access token lifetime: 30 days, 7 for field agents.
#[must_use]
pub const fn access_ttl_seconds(role: Role) -> i64 {
    match role {
        Role::Agent => 7 * 24 * 60 * 60,
        _ => 30 * 24 * 60 * 60,
    }
}

/// Refresh token lifetime: 60 days, 30 for field agents.
#[must_use]
pub const fn refresh_ttl_seconds(role: Role) -> i64 {
    match role {
        Role::Agent => 30 * 24 * 60 * 60,
        _ => 60 * 24 * 60 * 60,
    }
}

/// Purpose-bound pin-change tokens expire quickly.
pub const PIN_CHANGE_TTL_SECONDS: i64 = 15 * 60;
pub const PURPOSE_PIN_CHANGE: &str = "pin_change";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub user_id: i64,
    pub user_type: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_org_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: i64, role: Role, now_unix: i64, ttl_seconds: i64) -> Self {
        Self {
            sub: user_id.to_string(),
            user_id,
            user_type: role,
            device_id: None,
            buyer_org_id: None,
            purpose: None,
            iat: now_unix,
            exp: now_unix + ttl_seconds,
        }
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    #[must_use]
    pub fn with_buyer_org_id(mut self, buyer_org_id: Option<i64>) -> Self {
        self.buyer_org_id = buyer_org_id;
        self
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token purpose")]
    WrongPurpose,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an HS256 signed token.
///
/// # Errors
/// Returns an error if claims cannot be encoded or the key is rejected.
pub fn sign_hs256(secret: &[u8], claims: &Claims) -> Result<String, Error> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::Key)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 token and return its decoded claims.
///
/// # Errors
/// Returns an error if the token is malformed, the signature does not match,
/// or the claims are expired.
pub fn verify_hs256(token: &str, secret: &[u8], now_unix: i64) -> Result<Claims, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::Key)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: Claims = b64d_json(claims_b64)?;
    if claims.exp <= now_unix {
        return Err(Error::Expired);
    }

    Ok(claims)
}

/// Verify a purpose-bound token (e.g. pin change) against the expected purpose.
///
/// # Errors
/// Propagates `verify_hs256` failures and rejects mismatched purposes.
pub fn verify_purpose_token(
    token: &str,
    secret: &[u8],
    expected_purpose: &str,
    now_unix: i64,
) -> Result<Claims, Error> {
    let claims = verify_hs256(token, secret, now_unix)?;
    if claims.purpose.as_deref() == Some(expected_purpose) {
        Ok(claims)
    } else {
        Err(Error::WrongPurpose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-not-for-production";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn sign_and_verify_round_trip() -> Result<(), Error> {
        let claims = Claims::new(42, Role::Farmer, NOW, 3600)
            .with_device_id(Some("D1".to_string()));
        let token = sign_hs256(SECRET, &claims)?;
        let verified = verify_hs256(&token, SECRET, NOW + 10)?;
        assert_eq!(verified, claims);
        assert_eq!(verified.sub, "42");
        assert_eq!(verified.device_id.as_deref(), Some("D1"));
        Ok(())
    }

    #[test]
    fn rejects_wrong_secret_and_tampering() -> Result<(), Error> {
        let claims = Claims::new(7, Role::Buyer, NOW, 3600).with_buyer_org_id(Some(11));
        let token = sign_hs256(SECRET, &claims)?;

        let result = verify_hs256(&token, b"other-secret", NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));

        let mut tampered = token.clone();
        tampered.replace_range(10..11, if &token[10..11] == "A" { "B" } else { "A" });
        assert!(verify_hs256(&tampered, SECRET, NOW).is_err());
        Ok(())
    }

    #[test]
    fn rejects_expired() -> Result<(), Error> {
        let claims = Claims::new(7, Role::Hauler, NOW, 60);
        let token = sign_hs256(SECRET, &claims)?;
        let result = verify_hs256(&token, SECRET, NOW + 61);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            verify_hs256("only.two", SECRET, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_hs256("a.b.c.d", SECRET, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(verify_hs256("!!.!!.!!", SECRET, NOW).is_err());
    }

    #[test]
    fn purpose_token_checks_purpose() -> Result<(), Error> {
        let claims = Claims::new(9, Role::Agent, NOW, PIN_CHANGE_TTL_SECONDS)
            .with_purpose(PURPOSE_PIN_CHANGE);
        let token = sign_hs256(SECRET, &claims)?;

        let verified = verify_purpose_token(&token, SECRET, PURPOSE_PIN_CHANGE, NOW)?;
        assert_eq!(verified.user_id, 9);

        let plain = sign_hs256(SECRET, &Claims::new(9, Role::Agent, NOW, 3600))?;
        assert!(matches!(
            verify_purpose_token(&plain, SECRET, PURPOSE_PIN_CHANGE, NOW),
            Err(Error::WrongPurpose)
        ));
        Ok(())
    }

    #[test]
    fn agent_ttls_are_shorter() {
        assert_eq!(access_ttl_seconds(Role::Agent), 7 * 24 * 60 * 60);
        assert_eq!(access_ttl_seconds(Role::Farmer), 30 * 24 * 60 * 60);
        assert_eq!(refresh_ttl_seconds(Role::Agent), 30 * 24 * 60 * 60);
        assert_eq!(refresh_ttl_seconds(Role::Buyer), 60 * 24 * 60 * 60);
    }
}
