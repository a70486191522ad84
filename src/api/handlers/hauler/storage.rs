//! Database helpers for hauler profiles, documents, and the admin queue.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::super::is_unique_violation;
use super::types::{DocumentType, DocumentView, PendingHaulerRegistration, VerifyAction};

#[derive(Debug, Clone)]
pub(crate) struct HaulerProfileRow {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) full_name: Option<String>,
    pub(crate) phone: String,
    pub(crate) vehicle_type: Option<String>,
    pub(crate) vehicle_number: String,
    pub(crate) payload_capacity_kg: Option<f64>,
    pub(crate) dl_number: Option<String>,
    pub(crate) dl_expiry: Option<NaiveDate>,
    pub(crate) district: Option<String>,
    pub(crate) current_step: i32,
    pub(crate) verification_status: String,
    pub(crate) rejection_reason: Option<String>,
    pub(crate) submitted_at: Option<DateTime<Utc>>,
}

const PROFILE_COLUMNS: &str = "hauler_profiles.id, hauler_profiles.user_id, users.full_name, \
     users.phone, hauler_profiles.vehicle_type, hauler_profiles.vehicle_number, \
     hauler_profiles.payload_capacity_kg, hauler_profiles.dl_number, hauler_profiles.dl_expiry, \
     hauler_profiles.district, hauler_profiles.current_step, \
     hauler_profiles.verification_status, hauler_profiles.rejection_reason, \
     hauler_profiles.submitted_at";

fn row_to_profile(row: &PgRow) -> HaulerProfileRow {
    HaulerProfileRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        full_name: row.get("full_name"),
        phone: row.get("phone"),
        vehicle_type: row.get("vehicle_type"),
        vehicle_number: row.get("vehicle_number"),
        payload_capacity_kg: row.get("payload_capacity_kg"),
        dl_number: row.get("dl_number"),
        dl_expiry: row.get("dl_expiry"),
        district: row.get("district"),
        current_step: row.get("current_step"),
        verification_status: row.get("verification_status"),
        rejection_reason: row.get("rejection_reason"),
        submitted_at: row.get("submitted_at"),
    }
}

#[derive(Debug)]
pub(crate) enum CreateHaulerOutcome {
    Created { user_id: i64 },
    PhoneTaken,
}

/// Step-2 of the flow: the OTP checked out, so the user and the stub profile
/// are created together. The placeholder vehicle number keeps the row out of
/// the uniqueness set until real vehicle data lands.
pub(crate) async fn create_hauler_user(
    pool: &PgPool,
    bundle: &PendingHaulerRegistration,
    registration_token: &str,
) -> Result<CreateHaulerOutcome> {
    let mut tx = pool.begin().await.context("begin hauler create transaction")?;

    let query = r"
        INSERT INTO users (phone, full_name, role)
        VALUES ($1, $2, 'HAULER')
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
        .bind(&bundle.full_name)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Ok(CreateHaulerOutcome::PhoneTaken);
            }
            return Err(err).context("failed to insert hauler user");
        }
    };

    let query = r"
        INSERT INTO hauler_profiles
            (user_id, vehicle_number, current_step, verification_status, registration_token)
        VALUES ($1, $2, 1, 'IN_PROGRESS', $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(format!("TMP-{registration_token}"))
        .bind(registration_token)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert hauler profile stub")?;

    tx.commit().await.context("commit hauler create transaction")?;
    Ok(CreateHaulerOutcome::Created { user_id })
}

/// Resolve a live registration by token. Consumed tokens (submitted
/// registrations) resolve to nothing.
pub(crate) async fn find_profile_by_token(
    pool: &PgPool,
    registration_token: &str,
) -> Result<Option<HaulerProfileRow>> {
    let query = format!(
        "SELECT {PROFILE_COLUMNS}
         FROM hauler_profiles
         JOIN users ON users.id = hauler_profiles.user_id
         WHERE hauler_profiles.registration_token = $1
           AND users.deleted_at IS NULL"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(registration_token)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup hauler profile by token")?;
    Ok(row.as_ref().map(row_to_profile))
}

pub(crate) async fn find_profile_by_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Option<HaulerProfileRow>> {
    let query = format!(
        "SELECT {PROFILE_COLUMNS}
         FROM hauler_profiles
         JOIN users ON users.id = hauler_profiles.user_id
         WHERE hauler_profiles.user_id = $1
           AND users.deleted_at IS NULL"
    );
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
        .context("failed to lookup hauler profile by user")?;
    Ok(row.as_ref().map(row_to_profile))
}

/// Uniqueness applies only to rows past step 1; stub placeholders never count.
pub(crate) async fn vehicle_number_taken(
    pool: &PgPool,
    vehicle_number: &str,
    exclude_profile_id: i64,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM hauler_profiles
        WHERE vehicle_number = $1
          AND current_step > 1
          AND id <> $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(vehicle_number)
        .bind(exclude_profile_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check vehicle number uniqueness")?;
    Ok(row.is_some())
}

/// Write step-2 data and its documents. Resubmission replaces both.
pub(crate) async fn set_vehicle_info(
    pool: &PgPool,
    profile_id: i64,
    vehicle_type: &str,
    vehicle_number: &str,
    payload_capacity_kg: f64,
    district: Option<&str>,
    documents: &[(DocumentType, &str)],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin vehicle info transaction")?;

    let query = r"
        UPDATE hauler_profiles
        SET vehicle_type = $2,
            vehicle_number = $3,
            payload_capacity_kg = $4,
            district = COALESCE($5, district),
            current_step = 2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(profile_id)
        .bind(vehicle_type)
        .bind(vehicle_number)
        .bind(payload_capacity_kg)
        .bind(district)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update vehicle info")?;

    replace_documents(&mut tx, profile_id, documents).await?;

    tx.commit().await.context("commit vehicle info transaction")?;
    Ok(())
}

pub(crate) async fn set_license_info(
    pool: &PgPool,
    profile_id: i64,
    dl_number: &str,
    dl_expiry: NaiveDate,
    documents: &[(DocumentType, &str)],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin license info transaction")?;

    let query = r"
        UPDATE hauler_profiles
        SET dl_number = $2,
            dl_expiry = $3,
            current_step = 3,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(profile_id)
        .bind(dl_number)
        .bind(dl_expiry)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update license info")?;

    replace_documents(&mut tx, profile_id, documents).await?;

    tx.commit().await.context("commit license info transaction")?;
    Ok(())
}

async fn replace_documents(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    profile_id: i64,
    documents: &[(DocumentType, &str)],
) -> Result<()> {
    let kinds: Vec<&str> = documents.iter().map(|(kind, _)| kind.as_str()).collect();
    let query = r"
        DELETE FROM hauler_documents
        WHERE hauler_profile_id = $1
          AND doc_type = ANY($2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(profile_id)
        .bind(&kinds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to clear replaced documents")?;

    for (kind, url) in documents {
        let query = r"
            INSERT INTO hauler_documents (hauler_profile_id, doc_type, storage_url)
            VALUES ($1, $2, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(profile_id)
            .bind(kind.as_str())
            .bind(url)
            .execute(&mut **tx)
            .instrument(span)
            .await
            .context("failed to insert document")?;
    }
    Ok(())
}

pub(crate) async fn set_payment_step_done(pool: &PgPool, profile_id: i64) -> Result<()> {
    let query = r"
        UPDATE hauler_profiles
        SET current_step = 4, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(profile_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to advance payment step")?;
    Ok(())
}

/// Consume the token and hand the profile to the admin queue. The guard on
/// step and status makes a second submission a no-op reported to the caller.
pub(crate) async fn submit_registration(pool: &PgPool, profile_id: i64) -> Result<bool> {
    let query = r"
        UPDATE hauler_profiles
        SET verification_status = 'PENDING_VERIFICATION',
            submitted_at = NOW(),
            registration_token = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND current_step = 4
          AND verification_status = 'IN_PROGRESS'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(profile_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to submit registration")?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn documents_for_profile(
    pool: &PgPool,
    profile_id: i64,
) -> Result<Vec<DocumentView>> {
    let query = r"
        SELECT doc_type, storage_url, uploaded_at
        FROM hauler_documents
        WHERE hauler_profile_id = $1
        ORDER BY uploaded_at ASC, id ASC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(profile_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load documents")?;
    Ok(rows
        .into_iter()
        .map(|row| DocumentView {
            doc_type: row.get("doc_type"),
            storage_url: row.get("storage_url"),
            uploaded_at: row.get("uploaded_at"),
        })
        .collect())
}

/// Oldest-first page of completed registrations awaiting a decision.
pub(crate) async fn pending_verifications(
    pool: &PgPool,
    page: i64,
    limit: i64,
    district: Option<&str>,
) -> Result<(Vec<HaulerProfileRow>, i64)> {
    let offset = (page - 1) * limit;
    let query = format!(
        "SELECT {PROFILE_COLUMNS}
         FROM hauler_profiles
         JOIN users ON users.id = hauler_profiles.user_id
         WHERE hauler_profiles.verification_status = 'PENDING_VERIFICATION'
           AND hauler_profiles.current_step = 4
           AND users.deleted_at IS NULL
           AND ($1::text IS NULL OR hauler_profiles.district = $1)
         ORDER BY hauler_profiles.submitted_at ASC
         LIMIT $2 OFFSET $3"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(district)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list pending verifications")?;

    let query = r"
        SELECT COUNT(*)
        FROM hauler_profiles
        JOIN users ON users.id = hauler_profiles.user_id
        WHERE hauler_profiles.verification_status = 'PENDING_VERIFICATION'
          AND hauler_profiles.current_step = 4
          AND users.deleted_at IS NULL
          AND ($1::text IS NULL OR hauler_profiles.district = $1)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let total: i64 = sqlx::query(query)
        .bind(district)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count pending verifications")?
        .get(0);

    Ok((rows.iter().map(row_to_profile).collect(), total))
}

#[derive(Debug)]
pub(crate) enum DecisionOutcome {
    /// The user the decision applied to, for notification dispatch.
    Applied { user_id: i64 },
    /// The row was no longer pending; a racing decision won.
    NotPending,
}

/// Apply an approve/reject decision. The status guard serializes racing
/// decisions: the loser observes zero updated rows.
pub(crate) async fn apply_decision(
    pool: &PgPool,
    hauler_id: i64,
    action: VerifyAction,
    rejection_reason: Option<&str>,
    verified_by: i64,
) -> Result<DecisionOutcome> {
    let (status, reason) = match action {
        VerifyAction::Approve => ("ACTIVE", None),
        VerifyAction::Reject => ("REJECTED", rejection_reason),
    };

    let query = r"
        UPDATE hauler_profiles
        SET verification_status = $2,
            verified_by = $3,
            verified_at = NOW(),
            rejection_reason = $4,
            updated_at = NOW()
        WHERE id = $1
          AND verification_status = 'PENDING_VERIFICATION'
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hauler_id)
        .bind(status)
        .bind(verified_by)
        .bind(reason)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to apply verification decision")?;

    Ok(match row {
        Some(row) => DecisionOutcome::Applied {
            user_id: row.get("user_id"),
        },
        None => DecisionOutcome::NotPending,
    })
}
