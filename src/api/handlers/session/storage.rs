//! Session persistence: hashed bearer rows, single-device revocation, and
//! refresh rotation.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;

use crate::auth::{Role, jwt, tokens};

/// Freshly issued access/refresh pair. The access token is returned raw to
/// the client; only its SHA-256 is stored.
#[derive(Debug, Clone)]
pub(crate) struct TokenPair {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) expires_at: DateTime<Utc>,
}

pub(crate) struct SessionOptions {
    pub(crate) device_id: Option<String>,
    pub(crate) buyer_org_id: Option<i64>,
    pub(crate) ip_address: Option<String>,
    pub(crate) user_agent: Option<String>,
    /// Phone-credentialed logins revoke all prior sessions.
    pub(crate) single_device: bool,
}

impl SessionOptions {
    pub(crate) fn single_device(device_id: Option<String>) -> Self {
        Self {
            device_id,
            buyer_org_id: None,
            ip_address: None,
            user_agent: None,
            single_device: true,
        }
    }

    pub(crate) fn multi_device() -> Self {
        Self {
            device_id: None,
            buyer_org_id: None,
            ip_address: None,
            user_agent: None,
            single_device: false,
        }
    }

    pub(crate) fn with_client(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub(crate) fn with_buyer_org(mut self, buyer_org_id: Option<i64>) -> Self {
        self.buyer_org_id = buyer_org_id;
        self
    }
}

/// Sign a token pair and persist the session row. Prior sessions are
/// soft-deleted in the same transaction when single-device is requested.
pub(crate) async fn issue_session(
    pool: &PgPool,
    jwt_secret: &[u8],
    user_id: i64,
    role: Role,
    options: SessionOptions,
) -> Result<TokenPair> {
    let now = Utc::now();
    let access_ttl = jwt::access_ttl_seconds(role);
    let refresh_ttl = jwt::refresh_ttl_seconds(role);

    let claims = jwt::Claims::new(user_id, role, now.timestamp(), access_ttl)
        .with_device_id(options.device_id.clone())
        .with_buyer_org_id(options.buyer_org_id);
    let access_token =
        jwt::sign_hs256(jwt_secret, &claims).map_err(|err| anyhow!("jwt signing failed: {err}"))?;
    let refresh_token = tokens::generate_token()?;

    let expires_at = now + ChronoDuration::seconds(access_ttl);
    let refresh_expires_at = now + ChronoDuration::seconds(refresh_ttl);

    let mut tx = pool.begin().await.context("begin session transaction")?;
    if options.single_device {
        revoke_all_sessions_tx(&mut tx, user_id).await?;
    }

    let query = r"
        INSERT INTO sessions
            (user_id, token_hash, refresh_token, expires_at, refresh_expires_at,
             ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(tokens::sha256_hex(&access_token))
        .bind(&refresh_token)
        .bind(expires_at)
        .bind(refresh_expires_at)
        .bind(options.ip_address.as_deref())
        .bind(options.user_agent.as_deref())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert session")?;

    tx.commit().await.context("commit session transaction")?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        expires_at,
    })
}

pub(crate) async fn revoke_all_sessions_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<()> {
    let query = r"
        UPDATE sessions
        SET deleted_at = NOW()
        WHERE user_id = $1
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke sessions")?;
    Ok(())
}

/// A session is active iff the hash matches a non-soft-deleted, unexpired row.
pub(crate) async fn session_is_active(pool: &PgPool, token_hash: &str) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM sessions
        WHERE token_hash = $1
          AND deleted_at IS NULL
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;
    Ok(row.is_some())
}

/// Logout is idempotent; missing rows are fine.
pub(crate) async fn soft_delete_by_hash(pool: &PgPool, token_hash: &str) -> Result<()> {
    let query = r"
        UPDATE sessions
        SET deleted_at = NOW()
        WHERE token_hash = $1
          AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to soft delete session")?;
    Ok(())
}

/// Single-generation rotation, step one: validate the presented refresh
/// token and retire its session row. The caller issues the replacement pair
/// so claims (device, organization) can be rebuilt.
pub(crate) async fn consume_refresh(
    pool: &PgPool,
    refresh_token: &str,
) -> Result<Option<(i64, Role)>> {
    let query = r"
        SELECT sessions.id, sessions.user_id, users.role
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.refresh_token = $1
          AND sessions.deleted_at IS NULL
          AND sessions.refresh_expires_at > NOW()
          AND users.deleted_at IS NULL
          AND users.is_active
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(refresh_token)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup refresh token")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let session_id: i64 = row.get("id");
    let user_id: i64 = row.get("user_id");
    let role_text: String = row.get("role");
    let role = Role::parse(&role_text).ok_or_else(|| anyhow!("unknown role {role_text}"))?;

    let query = "UPDATE sessions SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to retire refreshed session")?;
    if result.rows_affected() == 0 {
        // Lost the race against a concurrent rotation of the same token.
        return Ok(None);
    }

    Ok(Some((user_id, role)))
}
