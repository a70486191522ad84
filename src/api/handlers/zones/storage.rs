//! Database helpers for the zone tree and agent assignment counts.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

#[derive(Debug, Clone)]
pub(crate) struct ZoneRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) zone_type: String,
    pub(crate) code: Option<String>,
    pub(crate) parent_id: Option<i64>,
}

fn row_to_zone(row: &PgRow) -> ZoneRow {
    ZoneRow {
        id: row.get("id"),
        name: row.get("name"),
        zone_type: row.get("zone_type"),
        code: row.get("code"),
        parent_id: row.get("parent_id"),
    }
}

const ZONE_COLUMNS: &str = "id, name, zone_type, code, parent_id";

pub(crate) async fn find_zone(pool: &PgPool, zone_id: i64) -> Result<Option<ZoneRow>> {
    let query = format!("SELECT {ZONE_COLUMNS} FROM zones WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(zone_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup zone")?;
    Ok(row.as_ref().map(row_to_zone))
}

/// Zones managed by a district manager, each with its current agent count.
pub(crate) async fn zones_by_manager(
    pool: &PgPool,
    manager_id: i64,
) -> Result<Vec<(ZoneRow, i64)>> {
    let query = r"
        SELECT zones.id, zones.name, zones.zone_type, zones.code, zones.parent_id,
               COUNT(aza.id) FILTER (WHERE aza.effective_to IS NULL) AS assignment_count
        FROM zones
        LEFT JOIN agent_zone_assignments aza ON aza.zone_id = zones.id
        WHERE zones.district_manager_id = $1
        GROUP BY zones.id
        ORDER BY zones.name
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(manager_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list managed zones")?;
    Ok(rows
        .iter()
        .map(|row| (row_to_zone(row), row.get("assignment_count")))
        .collect())
}

pub(crate) async fn child_zones(pool: &PgPool, parent_id: i64) -> Result<Vec<ZoneRow>> {
    let query = format!("SELECT {ZONE_COLUMNS} FROM zones WHERE parent_id = $1 ORDER BY name");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(parent_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list child zones")?;
    Ok(rows.iter().map(row_to_zone).collect())
}

pub(crate) async fn all_zones(pool: &PgPool) -> Result<Vec<ZoneRow>> {
    let query = format!("SELECT {ZONE_COLUMNS} FROM zones ORDER BY name");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list zones")?;
    Ok(rows.iter().map(row_to_zone).collect())
}

/// Walk ancestors (self included) and return the first district manager.
pub(crate) async fn manager_for_zone(pool: &PgPool, zone_id: i64) -> Result<Option<i64>> {
    let query = r"
        WITH RECURSIVE lineage AS (
            SELECT id, parent_id, district_manager_id, 0 AS depth
            FROM zones WHERE id = $1
            UNION ALL
            SELECT zones.id, zones.parent_id, zones.district_manager_id, lineage.depth + 1
            FROM zones
            JOIN lineage ON zones.id = lineage.parent_id
            WHERE lineage.depth < 4
        )
        SELECT district_manager_id
        FROM lineage
        WHERE district_manager_id IS NOT NULL
        ORDER BY depth
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(zone_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve zone manager")?;
    Ok(row.map(|row| row.get("district_manager_id")))
}

/// Walk ancestors (self included) and return the state-level zone.
pub(crate) async fn state_ancestor(pool: &PgPool, zone_id: i64) -> Result<Option<ZoneRow>> {
    let query = r"
        WITH RECURSIVE lineage AS (
            SELECT id, name, zone_type, code, parent_id, 0 AS depth
            FROM zones WHERE id = $1
            UNION ALL
            SELECT zones.id, zones.name, zones.zone_type, zones.code, zones.parent_id,
                   lineage.depth + 1
            FROM zones
            JOIN lineage ON zones.id = lineage.parent_id
            WHERE lineage.depth < 4
        )
        SELECT id, name, zone_type, code, parent_id
        FROM lineage
        WHERE zone_type = 'STATE'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(zone_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve state ancestor")?;
    Ok(row.as_ref().map(row_to_zone))
}
