//! Route handlers for the onboarding and authentication surface.
//!
//! Handlers validate request shape, call the domain services, and translate
//! typed failures into the `ApiError` envelope. Shared helpers for bearer
//! extraction and caller authentication live here.

pub mod agent;
pub mod buyer;
pub mod farmer;
pub mod hauler;
pub mod health;
pub mod root;
pub mod session;
pub mod team;
pub mod users;
pub mod zones;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::Utc;
use sqlx::PgPool;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::state::AppContext;
use crate::auth::{Role, jwt, tokens::sha256_hex};

/// Authenticated caller resolved from the bearer token and session table.
#[derive(Debug, Clone)]
pub(crate) struct Principal {
    pub(crate) user_id: i64,
    pub(crate) role: Role,
    pub(crate) buyer_org_id: Option<i64>,
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP from common proxy headers for session bookkeeping.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Resolve the caller: valid signature, live claims, and a session row that
/// is neither soft-deleted nor expired.
pub(crate) async fn authenticate(
    headers: &HeaderMap,
    ctx: &AppContext,
    pool: &PgPool,
) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "Missing bearer token"))?;

    let claims = jwt::verify_hs256(&token, ctx.jwt_secret(), Utc::now().timestamp())
        .map_err(|_| ApiError::new(ErrorCode::Unauthorized, "Invalid or expired token"))?;

    let token_hash = sha256_hex(&token);
    let active = session::storage::session_is_active(pool, &token_hash)
        .await
        .map_err(ApiError::internal)?;
    if !active {
        return Err(ApiError::new(ErrorCode::Unauthorized, "Session revoked"));
    }

    Ok(Principal {
        user_id: claims.user_id,
        role: claims.user_type,
        buyer_org_id: claims.buyer_org_id,
    })
}

/// Like `authenticate`, and additionally require one of the given roles.
pub(crate) async fn authenticate_role(
    headers: &HeaderMap,
    ctx: &AppContext,
    pool: &PgPool,
    allowed: &[Role],
) -> Result<Principal, ApiError> {
    let principal = authenticate(headers, ctx, pool).await?;
    if allowed.contains(&principal.role) {
        Ok(principal)
    } else {
        Err(ApiError::new(
            ErrorCode::Unauthorized,
            "Caller lacks the required role",
        ))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction_handles_casing_and_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(extract_bearer_token(&headers), Some("xyz".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
