//! Database helpers for agent profiles, employee ids, and zone assignments.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::super::is_unique_violation;

#[derive(Debug, Clone)]
pub(crate) struct AgentRow {
    pub(crate) user_id: i64,
    pub(crate) employee_id: String,
    pub(crate) full_name: Option<String>,
    pub(crate) phone: Option<String>,
    pub(crate) status: String,
    pub(crate) employment_type: String,
    pub(crate) start_date: NaiveDate,
    pub(crate) training_completed_at: Option<DateTime<Utc>>,
    pub(crate) zone_id: Option<i64>,
    pub(crate) zone_name: Option<String>,
}

fn row_to_agent(row: &PgRow) -> AgentRow {
    AgentRow {
        user_id: row.get("user_id"),
        employee_id: row.get("employee_id"),
        full_name: row.get("full_name"),
        phone: row.get("phone"),
        status: row.get("status"),
        employment_type: row.get("employment_type"),
        start_date: row.get("start_date"),
        training_completed_at: row.get("training_completed_at"),
        zone_id: row.get("zone_id"),
        zone_name: row.get("zone_name"),
    }
}

const AGENT_SELECT: &str = r"
    SELECT ap.user_id, ap.employee_id, users.full_name, users.phone, ap.status,
           ap.employment_type, ap.start_date, ap.training_completed_at,
           aza.zone_id AS zone_id, zones.name AS zone_name
    FROM agent_profiles ap
    JOIN users ON users.id = ap.user_id
    LEFT JOIN agent_zone_assignments aza
        ON aza.agent_user_id = ap.user_id AND aza.effective_to IS NULL
    LEFT JOIN zones ON zones.id = aza.zone_id
";

pub(crate) struct NewAgent<'a> {
    pub(crate) full_name: &'a str,
    pub(crate) phone: &'a str,
    pub(crate) zone_id: i64,
    pub(crate) state_code: &'a str,
    pub(crate) start_date: NaiveDate,
    pub(crate) employment_type: &'a str,
    pub(crate) temp_pin_hash: &'a str,
    pub(crate) temp_pin_ttl_hours: i64,
    pub(crate) created_by: i64,
}

#[derive(Debug)]
pub(crate) enum CreateAgentOutcome {
    Created { user_id: i64, employee_id: String },
    PhoneTaken,
}

/// Provision the agent: user, profile, and the opening zone assignment in one
/// transaction. Employee ids are sequential per state; a concurrent creation
/// that takes the same number trips the unique index and the whole attempt
/// retries with a fresh sequence read.
pub(crate) async fn create_agent(
    pool: &PgPool,
    agent: &NewAgent<'_>,
) -> Result<CreateAgentOutcome> {
    for _ in 0..3 {
        match try_create_agent(pool, agent).await? {
            TryCreateOutcome::Done(outcome) => return Ok(outcome),
            TryCreateOutcome::EmployeeIdClash => {}
        }
    }
    Err(anyhow!("failed to allocate a unique employee id"))
}

enum TryCreateOutcome {
    Done(CreateAgentOutcome),
    EmployeeIdClash,
}

async fn try_create_agent(pool: &PgPool, agent: &NewAgent<'_>) -> Result<TryCreateOutcome> {
    let mut tx = pool.begin().await.context("begin agent create transaction")?;

    let prefix = format!("AGT-{}-", agent.state_code);
    let query = "SELECT COUNT(*) FROM agent_profiles WHERE employee_id LIKE $1 || '%'";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let count: i64 = sqlx::query(query)
        .bind(&prefix)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to count agents for employee id")?
        .get(0);
    let employee_id = format!("{prefix}{:03}", count + 1);

    let query = r"
        INSERT INTO users (phone, full_name, role, temp_pin_hash, temp_pin_expires_at)
        VALUES ($1, $2, 'AGENT', $3, NOW() + ($4 * INTERVAL '1 hour'))
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(agent.phone)
        .bind(agent.full_name)
        .bind(agent.temp_pin_hash)
        .bind(agent.temp_pin_ttl_hours)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Ok(TryCreateOutcome::Done(CreateAgentOutcome::PhoneTaken));
            }
            return Err(err).context("failed to insert agent user");
        }
    };

    let query = r"
        INSERT INTO agent_profiles
            (user_id, employee_id, employment_type, status, start_date, created_by)
        VALUES ($1, $2, $3, 'TRAINING', $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(&employee_id)
        .bind(agent.employment_type)
        .bind(agent.start_date)
        .bind(agent.created_by)
        .execute(&mut *tx)
        .instrument(span)
        .await;
    if let Err(err) = result {
        let _ = tx.rollback().await;
        if is_unique_violation(&err) {
            return Ok(TryCreateOutcome::EmployeeIdClash);
        }
        return Err(err).context("failed to insert agent profile");
    }

    let query = r"
        INSERT INTO agent_zone_assignments
            (agent_user_id, zone_id, assigned_by, effective_from)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(agent.zone_id)
        .bind(agent.created_by)
        .bind(agent.start_date)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert zone assignment")?;

    tx.commit().await.context("commit agent create transaction")?;
    Ok(TryCreateOutcome::Done(CreateAgentOutcome::Created {
        user_id,
        employee_id,
    }))
}

/// Swap the temporary PIN for the permanent one.
pub(crate) async fn set_permanent_pin(pool: &PgPool, user_id: i64, pin_hash: &str) -> Result<()> {
    let query = r"
        UPDATE users
        SET pin_hash = $2,
            temp_pin_hash = NULL,
            temp_pin_expires_at = NULL,
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
        .bind(user_id)
        .bind(pin_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set permanent pin")?;
    Ok(())
}

pub(crate) async fn agent_by_user(pool: &PgPool, user_id: i64) -> Result<Option<AgentRow>> {
    let query = format!("{AGENT_SELECT} WHERE ap.user_id = $1 AND users.deleted_at IS NULL");
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
        .context("failed to lookup agent")?;
    Ok(row.as_ref().map(row_to_agent))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrainingOutcome {
    Completed,
    AlreadyCompleted,
    NotFound,
}

/// `TRAINING -> ACTIVE`, idempotent: a second call reports completion without
/// touching the row again.
pub(crate) async fn complete_training(pool: &PgPool, user_id: i64) -> Result<TrainingOutcome> {
    let query = r"
        UPDATE agent_profiles
        SET status = 'ACTIVE', training_completed_at = NOW(), updated_at = NOW()
        WHERE user_id = $1
          AND status = 'TRAINING'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to complete training")?;
    if result.rows_affected() > 0 {
        return Ok(TrainingOutcome::Completed);
    }

    let query = "SELECT status FROM agent_profiles WHERE user_id = $1";
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
        .context("failed to read agent status")?;
    match row {
        Some(row) if row.get::<String, _>("status") == "ACTIVE" => {
            Ok(TrainingOutcome::AlreadyCompleted)
        }
        Some(_) | None => Ok(TrainingOutcome::NotFound),
    }
}

/// Deactivate the agent and disable their login in one transaction.
pub(crate) async fn deactivate(pool: &PgPool, user_id: i64, reason: &str) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin deactivate transaction")?;

    let query = r"
        UPDATE agent_profiles
        SET status = 'INACTIVE',
            deactivated_at = NOW(),
            deactivation_reason = $2,
            updated_at = NOW()
        WHERE user_id = $1
          AND status <> 'INACTIVE'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(reason)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to deactivate agent")?;
    if result.rows_affected() == 0 {
        let _ = tx.rollback().await;
        return Ok(false);
    }

    let query = "UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1";
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
        .context("failed to disable agent login")?;

    tx.commit().await.context("commit deactivate transaction")?;
    Ok(true)
}

/// Close the current assignment and open the new one atomically, preserving
/// the one-open-assignment invariant.
pub(crate) async fn reassign_zone(
    pool: &PgPool,
    agent_user_id: i64,
    new_zone_id: i64,
    assigned_by: i64,
    effective_from: NaiveDate,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin reassign transaction")?;

    let query = r"
        UPDATE agent_zone_assignments
        SET effective_to = $2
        WHERE agent_user_id = $1
          AND effective_to IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(agent_user_id)
        .bind(effective_from)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to close current assignment")?;

    let query = r"
        INSERT INTO agent_zone_assignments
            (agent_user_id, zone_id, assigned_by, effective_from)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(agent_user_id)
        .bind(new_zone_id)
        .bind(assigned_by)
        .bind(effective_from)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to open new assignment")?;

    tx.commit().await.context("commit reassign transaction")?;
    Ok(())
}

pub(crate) async fn list_agents(
    pool: &PgPool,
    status: Option<&str>,
    zone_id: Option<i64>,
    page: i64,
    limit: i64,
) -> Result<(Vec<AgentRow>, i64)> {
    let offset = (page - 1) * limit;
    let query = format!(
        "{AGENT_SELECT}
         WHERE users.deleted_at IS NULL
           AND ($1::text IS NULL OR ap.status = $1)
           AND ($2::bigint IS NULL OR aza.zone_id = $2)
         ORDER BY ap.employee_id
         LIMIT $3 OFFSET $4"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(status)
        .bind(zone_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list agents")?;

    let query = r"
        SELECT COUNT(*)
        FROM agent_profiles ap
        JOIN users ON users.id = ap.user_id
        LEFT JOIN agent_zone_assignments aza
            ON aza.agent_user_id = ap.user_id AND aza.effective_to IS NULL
        WHERE users.deleted_at IS NULL
          AND ($1::text IS NULL OR ap.status = $1)
          AND ($2::bigint IS NULL OR aza.zone_id = $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let total: i64 = sqlx::query(query)
        .bind(status)
        .bind(zone_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count agents")?
        .get(0);

    Ok((rows.iter().map(row_to_agent).collect(), total))
}
