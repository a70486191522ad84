//! Database helpers for memberships, invitations, and the role-change audit.
//!
//! The last-admin invariant is enforced inside the mutating transaction: the
//! organization's active admin rows are locked with `FOR UPDATE` and counted
//! before the mutation, so two racing operations cannot both observe a spare
//! admin.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;

use super::super::is_unique_violation;
use crate::auth::tokens::sha256_hex;

pub(crate) const INVITATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub(crate) struct MembershipRow {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) full_name: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) phone: Option<String>,
    pub(crate) role: String,
    pub(crate) status: String,
    pub(crate) accepted_at: Option<DateTime<Utc>>,
}

fn row_to_membership(row: &PgRow) -> MembershipRow {
    MembershipRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        role: row.get("role"),
        status: row.get("status"),
        accepted_at: row.get("accepted_at"),
    }
}

const MEMBER_SELECT: &str = r"
    SELECT tm.id, tm.user_id, users.full_name, users.email, users.phone,
           tm.role, tm.status, tm.accepted_at
    FROM team_memberships tm
    JOIN users ON users.id = tm.user_id
";

/// The caller's membership in an organization, if any.
pub(crate) async fn caller_membership(
    pool: &PgPool,
    org_id: i64,
    user_id: i64,
) -> Result<Option<MembershipRow>> {
    let query = format!("{MEMBER_SELECT} WHERE tm.buyer_org_id = $1 AND tm.user_id = $2");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup caller membership")?;
    Ok(row.as_ref().map(row_to_membership))
}

pub(crate) async fn member_email_exists(pool: &PgPool, org_id: i64, email: &str) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM team_memberships tm
        JOIN users ON users.id = tm.user_id
        WHERE tm.buyer_org_id = $1
          AND users.email = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(org_id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check member email")?;
    Ok(row.is_some())
}

pub(crate) async fn pending_invitation_exists(
    pool: &PgPool,
    org_id: i64,
    email: &str,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM team_invitations
        WHERE buyer_org_id = $1
          AND email = $2
          AND NOT accepted
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
        .bind(org_id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check pending invitation")?;
    Ok(row.is_some())
}

pub(crate) async fn insert_invitation(
    pool: &PgPool,
    org_id: i64,
    email: &str,
    mobile: Option<&str>,
    role: &str,
    invited_by: i64,
    raw_token: &str,
) -> Result<(i64, DateTime<Utc>)> {
    let token_hash = bcrypt::hash(raw_token, 12).context("failed to hash invitation token")?;
    let query = r"
        INSERT INTO team_invitations
            (buyer_org_id, email, mobile, role, invited_by, token_hash, lookup_digest,
             expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + ($8 * INTERVAL '1 hour'))
        RETURNING id, expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(org_id)
        .bind(email)
        .bind(mobile)
        .bind(role)
        .bind(invited_by)
        .bind(token_hash)
        .bind(sha256_hex(raw_token))
        .bind(INVITATION_TTL_HOURS)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert invitation")?;
    Ok((row.get("id"), row.get("expires_at")))
}

#[derive(Debug, Clone)]
pub(crate) struct InvitationRow {
    pub(crate) id: i64,
    pub(crate) org_id: i64,
    pub(crate) email: String,
    pub(crate) mobile: Option<String>,
    pub(crate) token_hash: String,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) accepted: bool,
    pub(crate) business_name: Option<String>,
}

/// O(1) lookup by the indexed digest; the bcrypt hash stays the verifier.
pub(crate) async fn find_invitation_by_token(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<InvitationRow>> {
    let query = r"
        SELECT ti.id, ti.buyer_org_id, ti.email, ti.mobile, ti.token_hash,
               ti.expires_at, ti.accepted, bp.business_name
        FROM team_invitations ti
        LEFT JOIN buyer_profiles bp ON bp.id = ti.buyer_org_id
        WHERE ti.lookup_digest = $1
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
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup invitation")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let invitation = InvitationRow {
        id: row.get("id"),
        org_id: row.get("buyer_org_id"),
        email: row.get("email"),
        mobile: row.get("mobile"),
        token_hash: row.get("token_hash"),
        expires_at: row.get("expires_at"),
        accepted: row.get("accepted"),
        business_name: row.get("business_name"),
    };
    if bcrypt::verify(raw_token, &invitation.token_hash).unwrap_or(false) {
        Ok(Some(invitation))
    } else {
        Ok(None)
    }
}

#[derive(Debug)]
pub(crate) enum AcceptOutcome {
    Created { user_id: i64 },
    EmailTaken,
    AlreadyAccepted,
}

/// Accept an invitation: create the member's user and membership and mark the
/// invitation consumed, all in one transaction. The accepted-flag guard makes
/// double acceptance lose cleanly.
pub(crate) async fn accept_invitation(
    pool: &PgPool,
    invitation: &InvitationRow,
    full_name: &str,
    password_hash: &str,
) -> Result<AcceptOutcome> {
    let mut tx = pool.begin().await.context("begin accept transaction")?;

    let query = r"
        UPDATE team_invitations
        SET accepted = TRUE, accepted_at = NOW()
        WHERE id = $1
          AND NOT accepted
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(invitation.id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to mark invitation accepted")?;
    if result.rows_affected() == 0 {
        let _ = tx.rollback().await;
        return Ok(AcceptOutcome::AlreadyAccepted);
    }

    let query = r"
        INSERT INTO users (email, phone, full_name, role, password_hash)
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
        .bind(&invitation.email)
        .bind(invitation.mobile.as_deref())
        .bind(full_name)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Ok(AcceptOutcome::EmailTaken);
            }
            return Err(err).context("failed to insert invited user");
        }
    };

    let query = r"
        INSERT INTO team_memberships
            (buyer_org_id, user_id, role, status, invited_by, accepted_at)
        SELECT buyer_org_id, $2, role, 'ACTIVE', invited_by, NOW()
        FROM team_invitations
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(invitation.id)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert membership")?;

    tx.commit().await.context("commit accept transaction")?;
    Ok(AcceptOutcome::Created { user_id })
}

pub(crate) async fn list_members(
    pool: &PgPool,
    org_id: i64,
    role: Option<&str>,
    status: Option<&str>,
    search: Option<&str>,
    page: i64,
    limit: i64,
) -> Result<(Vec<MembershipRow>, i64)> {
    let offset = (page - 1) * limit;
    let pattern = search.map(|term| format!("%{term}%"));
    let query = format!(
        "{MEMBER_SELECT}
         WHERE tm.buyer_org_id = $1
           AND ($2::text IS NULL OR tm.role = $2)
           AND ($3::text IS NULL OR tm.status = $3)
           AND ($4::text IS NULL
                OR users.full_name ILIKE $4
                OR users.email ILIKE $4)
         ORDER BY tm.id
         LIMIT $5 OFFSET $6"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(org_id)
        .bind(role)
        .bind(status)
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list members")?;

    let query = r"
        SELECT COUNT(*)
        FROM team_memberships tm
        JOIN users ON users.id = tm.user_id
        WHERE tm.buyer_org_id = $1
          AND ($2::text IS NULL OR tm.role = $2)
          AND ($3::text IS NULL OR tm.status = $3)
          AND ($4::text IS NULL
               OR users.full_name ILIKE $4
               OR users.email ILIKE $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let total: i64 = sqlx::query(query)
        .bind(org_id)
        .bind(role)
        .bind(status)
        .bind(pattern.as_deref())
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count members")?
        .get(0);

    Ok((rows.iter().map(row_to_membership).collect(), total))
}

/// Lock and fetch a membership row for mutation.
async fn lock_membership(
    tx: &mut Transaction<'_, Postgres>,
    org_id: i64,
    membership_id: i64,
) -> Result<Option<(i64, String, String)>> {
    let query = r"
        SELECT user_id, role, status
        FROM team_memberships
        WHERE id = $1
          AND buyer_org_id = $2
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(membership_id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock membership")?;
    Ok(row.map(|row| (row.get("user_id"), row.get("role"), row.get("status"))))
}

/// Lock every active admin row in the organization and return the count.
async fn locked_active_admin_count(
    tx: &mut Transaction<'_, Postgres>,
    org_id: i64,
) -> Result<i64> {
    let query = r"
        SELECT id
        FROM team_memberships
        WHERE buyer_org_id = $1
          AND role = 'ADMIN'
          AND status = 'ACTIVE'
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(org_id)
        .fetch_all(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock admin rows")?;
    Ok(i64::try_from(rows.len()).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationOutcome {
    Done,
    NotFound,
    LastAdmin,
    SelfAction,
}

pub(crate) async fn update_member_role(
    pool: &PgPool,
    org_id: i64,
    membership_id: i64,
    new_role: &str,
    changed_by: i64,
    reason: Option<&str>,
) -> Result<MutationOutcome> {
    let mut tx = pool.begin().await.context("begin role change transaction")?;

    let Some((_user_id, old_role, status)) =
        lock_membership(&mut tx, org_id, membership_id).await?
    else {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::NotFound);
    };

    if old_role == "ADMIN"
        && status == "ACTIVE"
        && new_role != "ADMIN"
        && locked_active_admin_count(&mut tx, org_id).await? <= 1
    {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::LastAdmin);
    }

    let query = r"
        UPDATE team_memberships
        SET role = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(membership_id)
        .bind(new_role)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update member role")?;

    let query = r"
        INSERT INTO team_role_changes (membership_id, old_role, new_role, changed_by, reason)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(membership_id)
        .bind(&old_role)
        .bind(new_role)
        .bind(changed_by)
        .bind(reason)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert role change audit")?;

    tx.commit().await.context("commit role change transaction")?;
    Ok(MutationOutcome::Done)
}

pub(crate) async fn deactivate_member(
    pool: &PgPool,
    org_id: i64,
    membership_id: i64,
    caller_user_id: i64,
) -> Result<MutationOutcome> {
    let mut tx = pool.begin().await.context("begin deactivate transaction")?;

    let Some((user_id, role, status)) = lock_membership(&mut tx, org_id, membership_id).await?
    else {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::NotFound);
    };
    if user_id == caller_user_id {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::SelfAction);
    }
    if role == "ADMIN"
        && status == "ACTIVE"
        && locked_active_admin_count(&mut tx, org_id).await? <= 1
    {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::LastAdmin);
    }

    let query = r"
        UPDATE team_memberships
        SET status = 'INACTIVE', updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(membership_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to deactivate member")?;

    tx.commit().await.context("commit deactivate transaction")?;
    Ok(MutationOutcome::Done)
}

pub(crate) async fn delete_member(
    pool: &PgPool,
    org_id: i64,
    membership_id: i64,
    caller_user_id: i64,
) -> Result<MutationOutcome> {
    let mut tx = pool.begin().await.context("begin delete transaction")?;

    let Some((user_id, role, status)) = lock_membership(&mut tx, org_id, membership_id).await?
    else {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::NotFound);
    };
    if user_id == caller_user_id {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::SelfAction);
    }
    if role == "ADMIN"
        && status == "ACTIVE"
        && locked_active_admin_count(&mut tx, org_id).await? <= 1
    {
        let _ = tx.rollback().await;
        return Ok(MutationOutcome::LastAdmin);
    }

    let query = "DELETE FROM team_memberships WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(membership_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete member")?;

    tx.commit().await.context("commit delete transaction")?;
    Ok(MutationOutcome::Done)
}

/// Re-arm an invitation with a fresh token and window.
pub(crate) async fn resend_invitation(
    pool: &PgPool,
    org_id: i64,
    invitation_id: i64,
    raw_token: &str,
) -> Result<Option<(String, DateTime<Utc>)>> {
    let token_hash = bcrypt::hash(raw_token, 12).context("failed to hash invitation token")?;
    let query = r"
        UPDATE team_invitations
        SET token_hash = $3,
            lookup_digest = $4,
            expires_at = NOW() + ($5 * INTERVAL '1 hour'),
            accepted = FALSE,
            accepted_at = NULL
        WHERE id = $1
          AND buyer_org_id = $2
        RETURNING email, expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(invitation_id)
        .bind(org_id)
        .bind(token_hash)
        .bind(sha256_hex(raw_token))
        .bind(INVITATION_TTL_HOURS)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resend invitation")?;
    Ok(row.map(|row| (row.get("email"), row.get("expires_at"))))
}
