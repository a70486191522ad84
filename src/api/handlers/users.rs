//! Shared user storage helpers.
//!
//! Every flow resolves principals through these lookups. Soft-deleted rows
//! are invisible to all of them.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use crate::auth::Role;

const USER_COLUMNS: &str = "id, phone, email, full_name, role, password_hash, pin_hash, \
     temp_pin_hash, temp_pin_expires_at, locked_until, is_active, language";

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: i64,
    pub(crate) phone: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) full_name: Option<String>,
    pub(crate) role: Role,
    pub(crate) password_hash: Option<String>,
    pub(crate) pin_hash: Option<String>,
    pub(crate) temp_pin_hash: Option<String>,
    pub(crate) temp_pin_expires_at: Option<DateTime<Utc>>,
    pub(crate) locked_until: Option<DateTime<Utc>>,
    pub(crate) is_active: bool,
    pub(crate) language: String,
}

fn row_to_user(row: &PgRow) -> Result<UserRecord> {
    let role_text: String = row.get("role");
    let role = Role::parse(&role_text).ok_or_else(|| anyhow!("unknown role {role_text}"))?;
    Ok(UserRecord {
        id: row.get("id"),
        phone: row.get("phone"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        role,
        password_hash: row.get("password_hash"),
        pin_hash: row.get("pin_hash"),
        temp_pin_hash: row.get("temp_pin_hash"),
        temp_pin_expires_at: row.get("temp_pin_expires_at"),
        locked_until: row.get("locked_until"),
        is_active: row.get("is_active"),
        language: row.get("language"),
    })
}

pub(crate) async fn find_user_by_phone(pool: &PgPool, phone: &str) -> Result<Option<UserRecord>> {
    let query =
        format!("SELECT {USER_COLUMNS} FROM users WHERE phone = $1 AND deleted_at IS NULL");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(phone)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by phone")?;
    row.as_ref().map(row_to_user).transpose()
}

pub(crate) async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query =
        format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    row.as_ref().map(row_to_user).transpose()
}

pub(crate) async fn find_user_by_id(pool: &PgPool, user_id: i64) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;
    row.as_ref().map(row_to_user).transpose()
}

pub(crate) async fn phone_exists(pool: &PgPool, phone: &str) -> Result<bool> {
    Ok(find_user_by_phone(pool, phone).await?.is_some())
}

pub(crate) async fn email_exists(pool: &PgPool, email: &str) -> Result<bool> {
    Ok(find_user_by_email(pool, email).await?.is_some())
}

pub(crate) async fn touch_last_login(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1";
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
        .context("failed to update last login")?;
    Ok(())
}

/// Store the permanent PIN hash; used by farmer `SetPin`.
pub(crate) async fn set_pin_hash(pool: &PgPool, user_id: i64, pin_hash: &str) -> Result<()> {
    let query = "UPDATE users SET pin_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(pin_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store pin hash")?;
    Ok(())
}
