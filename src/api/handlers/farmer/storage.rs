//! Database helpers for farmer accounts, profiles, and payment methods.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::super::is_unique_violation;
use super::types::PaymentType;
use crate::validators::FarmSize;

/// Outcome when creating the farmer user row.
#[derive(Debug)]
pub(crate) enum CreateUserOutcome {
    Created(i64),
    PhoneTaken,
}

pub(crate) async fn create_farmer_user(
    pool: &PgPool,
    phone: &str,
    language: &str,
) -> Result<CreateUserOutcome> {
    let query = r"
        INSERT INTO users (phone, role, language)
        VALUES ($1, 'FARMER', $2)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(language)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(CreateUserOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::PhoneTaken),
        Err(err) => Err(err).context("failed to insert farmer user"),
    }
}

/// Create or replace the identity portion of the profile. Re-submission of
/// the step replaces its data.
pub(crate) async fn upsert_profile(
    pool: &PgPool,
    user_id: i64,
    full_name: &str,
    district: &str,
    state: &str,
    village: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO farmer_profiles (user_id, full_name, district, state, village)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            district = EXCLUDED.district,
            state = EXCLUDED.state,
            village = EXCLUDED.village,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(full_name)
        .bind(district)
        .bind(state)
        .bind(village)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert farmer profile")?;

    let query = "UPDATE users SET full_name = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(full_name)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sync user name")?;
    Ok(())
}

pub(crate) async fn save_farm_profile(
    pool: &PgPool,
    user_id: i64,
    farm_size: FarmSize,
    farming_types: &[String],
    main_crops: &[String],
    farm_area_acres: Option<f64>,
) -> Result<()> {
    let query = r"
        INSERT INTO farmer_profiles (user_id, farm_size, farming_types, main_crops, farm_area_acres)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET farm_size = EXCLUDED.farm_size,
            farming_types = EXCLUDED.farming_types,
            main_crops = EXCLUDED.main_crops,
            farm_area_acres = EXCLUDED.farm_area_acres,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(farm_size.as_str())
        .bind(farming_types)
        .bind(main_crops)
        .bind(farm_area_acres)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to save farm profile")?;
    Ok(())
}

/// Insert a payment method as the new primary. At most one primary per user:
/// the demotion and the insert share a transaction.
pub(crate) async fn insert_primary_payment(
    pool: &PgPool,
    user_id: i64,
    payment_type: PaymentType,
    upi_id: Option<&str>,
    bank_account: Option<&str>,
    ifsc: Option<&str>,
    bank_name: Option<&str>,
    verified: bool,
) -> Result<i64> {
    let mut tx = pool.begin().await.context("begin payment transaction")?;

    let query = "UPDATE payment_details SET is_primary = FALSE WHERE user_id = $1 AND is_primary";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to demote primary payment methods")?;

    let query = r"
        INSERT INTO payment_details
            (user_id, payment_type, upi_id, bank_account, ifsc, bank_name,
             verified, verified_at, is_primary)
        VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $7 THEN NOW() END, TRUE)
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
        .bind(payment_type.as_str())
        .bind(upi_id)
        .bind(bank_account)
        .bind(ifsc)
        .bind(bank_name)
        .bind(verified)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert payment details")?;

    tx.commit().await.context("commit payment transaction")?;
    Ok(row.get("id"))
}

/// Mark the user's payment method with this VPA as verified.
/// Returns false when no matching row exists.
pub(crate) async fn mark_upi_verified(pool: &PgPool, user_id: i64, upi_id: &str) -> Result<bool> {
    let query = r"
        UPDATE payment_details
        SET verified = TRUE, verified_at = NOW()
        WHERE user_id = $1
          AND upi_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(upi_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark upi verified")?;
    Ok(result.rows_affected() > 0)
}
