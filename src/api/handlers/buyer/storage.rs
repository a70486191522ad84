//! Database helpers for buyer accounts, login lockout, and password resets.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::super::session::storage::revoke_all_sessions_tx;
use super::types::PendingBuyerRegistration;
use crate::auth::tokens::sha256_hex;

/// Email/password lockout thresholds for the database-resident counter.
pub(crate) const BUYER_LOGIN_THRESHOLD: i32 = 5;
const BUYER_LOCKOUT_MINUTES: i32 = 30;

const RESET_TOKEN_TTL_SECONDS: i64 = 3600;

pub(crate) struct BuyerAddress<'a> {
    pub(crate) address_line: &'a str,
    pub(crate) city: &'a str,
    pub(crate) district: Option<&'a str>,
    pub(crate) state: &'a str,
    pub(crate) pincode: &'a str,
}

#[derive(Debug)]
pub(crate) enum FinalizeOutcome {
    Created { user_id: i64, org_id: i64 },
    EmailTaken,
    PhoneTaken,
}

/// Create the buyer's user row, profile, and founding admin membership in a
/// single transaction. Unique violations are mapped to a typed outcome so the
/// race between two registrations resolves to exactly one account.
pub(crate) async fn finalize_registration(
    pool: &PgPool,
    bundle: &PendingBuyerRegistration,
    address: &BuyerAddress<'_>,
) -> Result<FinalizeOutcome> {
    let mut tx = pool.begin().await.context("begin buyer finalize transaction")?;

    let query = r"
        INSERT INTO users (phone, email, full_name, role, password_hash)
        VALUES ($1, $2, $3, 'BUYER', $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&bundle.phone)
        .bind(&bundle.email)
        .bind(&bundle.full_name)
        .bind(&bundle.password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            let outcome = match &err {
                sqlx::Error::Database(db_err)
                    if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
                {
                    if db_err.constraint() == Some("users_phone_key") {
                        Some(FinalizeOutcome::PhoneTaken)
                    } else {
                        Some(FinalizeOutcome::EmailTaken)
                    }
                }
                _ => None,
            };
            let _ = tx.rollback().await;
            return match outcome {
                Some(outcome) => Ok(outcome),
                None => Err(err).context("failed to insert buyer user"),
            };
        }
    };

    let query = r"
        INSERT INTO buyer_profiles
            (user_id, business_name, business_type, gst_number,
             address_line, city, district, state, pincode)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(&bundle.business_name)
        .bind(&bundle.business_type)
        .bind(bundle.gst_number.as_deref())
        .bind(address.address_line)
        .bind(address.city)
        .bind(address.district)
        .bind(address.state)
        .bind(address.pincode)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert buyer profile")?;
    let org_id: i64 = row.get("id");

    // Founding member is the organization's first active admin.
    let query = r"
        INSERT INTO team_memberships (buyer_org_id, user_id, role, status, accepted_at)
        VALUES ($1, $2, 'ADMIN', 'ACTIVE', NOW())
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(org_id)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert founding membership")?;

    tx.commit().await.context("commit buyer finalize transaction")?;
    Ok(FinalizeOutcome::Created { user_id, org_id })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbFailureOutcome {
    Counted { remaining_attempts: u32 },
    Locked { locked_until: DateTime<Utc> },
}

/// Bump the row-resident failure counter; the threshold write and the counter
/// increment are one statement, so racing failures cannot overshoot.
pub(crate) async fn record_password_failure(
    pool: &PgPool,
    user_id: i64,
) -> Result<DbFailureOutcome> {
    let query = r"
        UPDATE users
        SET login_attempts = login_attempts + 1,
            locked_until = CASE
                WHEN login_attempts + 1 >= $2
                THEN NOW() + ($3 * INTERVAL '1 minute')
                ELSE locked_until
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING login_attempts, locked_until
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(BUYER_LOGIN_THRESHOLD)
        .bind(BUYER_LOCKOUT_MINUTES)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record password failure")?;

    let attempts: i32 = row.get("login_attempts");
    if attempts >= BUYER_LOGIN_THRESHOLD {
        let locked_until: Option<DateTime<Utc>> = row.get("locked_until");
        Ok(DbFailureOutcome::Locked {
            locked_until: locked_until.unwrap_or_else(Utc::now),
        })
    } else {
        Ok(DbFailureOutcome::Counted {
            remaining_attempts: u32::try_from(BUYER_LOGIN_THRESHOLD - attempts).unwrap_or(0),
        })
    }
}

pub(crate) async fn reset_login_attempts(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = r"
        UPDATE users
        SET login_attempts = 0, locked_until = NULL, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to reset login attempts")?;
    Ok(())
}

/// The organization a buyer user acts for (founding owner or team member).
pub(crate) async fn buyer_org_for_user(pool: &PgPool, user_id: i64) -> Result<Option<i64>> {
    let query = r"
        SELECT buyer_org_id
        FROM team_memberships
        WHERE user_id = $1
          AND status = 'ACTIVE'
        ORDER BY id
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup buyer org")?;
    Ok(row.map(|row| row.get("buyer_org_id")))
}

/// Store a reset token: bcrypt hash as the verifier plus an indexed SHA-256
/// digest for O(1) lookup.
pub(crate) async fn create_reset_token(
    pool: &PgPool,
    user_id: i64,
    raw_token: &str,
) -> Result<()> {
    let token_hash = bcrypt::hash(raw_token, 12).context("failed to hash reset token")?;
    let query = r"
        INSERT INTO password_reset_tokens (user_id, token_hash, lookup_digest, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(sha256_hex(raw_token))
        .bind(RESET_TOKEN_TTL_SECONDS)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert reset token")?;
    Ok(())
}

#[derive(Debug)]
pub(crate) enum ResetOutcome {
    Done,
    InvalidToken,
}

/// Consume a reset token and set the new password hash. Marking the token
/// used, the credential swap, and the session purge share a transaction.
pub(crate) async fn consume_reset_token(
    pool: &PgPool,
    raw_token: &str,
    new_password_hash: &str,
) -> Result<ResetOutcome> {
    let mut tx = pool.begin().await.context("begin reset transaction")?;

    let query = r"
        SELECT id, user_id, token_hash
        FROM password_reset_tokens
        WHERE lookup_digest = $1
          AND used_at IS NULL
          AND expires_at > NOW()
        FOR UPDATE
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(sha256_hex(raw_token))
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup reset token")?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Ok(ResetOutcome::InvalidToken);
    };

    let token_id: i64 = row.get("id");
    let user_id: i64 = row.get("user_id");
    let token_hash: String = row.get("token_hash");
    if !bcrypt::verify(raw_token, &token_hash).unwrap_or(false) {
        let _ = tx.rollback().await;
        return Ok(ResetOutcome::InvalidToken);
    }

    let query = "UPDATE password_reset_tokens SET used_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to mark reset token used")?;

    let query = r"
        UPDATE users
        SET password_hash = $2, login_attempts = 0, locked_until = NULL, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password")?;

    revoke_all_sessions_tx(&mut tx, user_id).await?;

    tx.commit().await.context("commit reset transaction")?;
    Ok(ResetOutcome::Done)
}
