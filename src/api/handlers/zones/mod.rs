//! Zone hierarchy endpoints used by agent provisioning and dashboards.

pub(crate) mod storage;
pub mod types;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::AppContext;

use super::authenticate;
use storage::ZoneRow;
use types::{ZoneHierarchyResponse, ZoneListResponse, ZoneNode, ZoneType, ZoneView};

fn zone_view(zone: &ZoneRow, assignment_count: Option<i64>) -> Result<ZoneView, ApiError> {
    let zone_type = ZoneType::parse(&zone.zone_type)
        .ok_or_else(|| ApiError::internal(format!("unknown zone type {}", zone.zone_type)))?;
    Ok(ZoneView {
        zone_id: zone.id,
        name: zone.name.clone(),
        zone_type,
        parent_id: zone.parent_id,
        assignment_count,
    })
}

#[utoipa::path(
    get,
    path = "/v1/zones",
    responses(
        (status = 200, description = "Zones managed by the caller", body = ZoneListResponse)
    ),
    tag = "zones"
)]
pub async fn get_zones(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
) -> Result<Json<ZoneListResponse>, ApiError> {
    let principal = authenticate(&headers, &ctx, &pool).await?;
    let zones = storage::zones_by_manager(&pool, principal.user_id)
        .await
        .map_err(ApiError::internal)?;
    let zones = zones
        .iter()
        .map(|(zone, count)| zone_view(zone, Some(*count)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ZoneListResponse {
        success: true,
        zones,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/zones/{zoneId}/children",
    params(("zoneId" = i64, Path, description = "Parent zone id")),
    responses(
        (status = 200, description = "Direct children", body = ZoneListResponse)
    ),
    tag = "zones"
)]
pub async fn get_child_zones(
    pool: Extension<PgPool>,
    Path(zone_id): Path<i64>,
) -> Result<Json<ZoneListResponse>, ApiError> {
    let zones = storage::child_zones(&pool, zone_id)
        .await
        .map_err(ApiError::internal)?;
    let zones = zones
        .iter()
        .map(|zone| zone_view(zone, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ZoneListResponse {
        success: true,
        zones,
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ZoneHierarchyQuery {
    pub root_id: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/zones/hierarchy",
    params(ZoneHierarchyQuery),
    responses(
        (status = 200, description = "Zone tree expanded to four levels", body = ZoneHierarchyResponse)
    ),
    tag = "zones"
)]
pub async fn get_zone_hierarchy(
    pool: Extension<PgPool>,
    Query(query): Query<ZoneHierarchyQuery>,
) -> Result<Json<ZoneHierarchyResponse>, ApiError> {
    let zones = storage::all_zones(&pool).await.map_err(ApiError::internal)?;
    let roots = build_tree(&zones, query.root_id)?;
    Ok(Json(ZoneHierarchyResponse {
        success: true,
        roots,
    }))
}

/// Assemble the eager tree in memory. Depth is bounded by the four zone
/// levels, so a single pass over the rows is enough.
fn build_tree(zones: &[ZoneRow], root_id: Option<i64>) -> Result<Vec<ZoneNode>, ApiError> {
    let mut children_of: HashMap<Option<i64>, Vec<&ZoneRow>> = HashMap::new();
    for zone in zones {
        children_of.entry(zone.parent_id).or_default().push(zone);
    }

    let roots: Vec<&ZoneRow> = match root_id {
        Some(id) => zones.iter().filter(|zone| zone.id == id).collect(),
        None => children_of.get(&None).cloned().unwrap_or_default(),
    };

    roots
        .into_iter()
        .map(|root| build_node(root, &children_of, 1))
        .collect()
}

fn build_node(
    zone: &ZoneRow,
    children_of: &HashMap<Option<i64>, Vec<&ZoneRow>>,
    depth: u8,
) -> Result<ZoneNode, ApiError> {
    let zone_type = ZoneType::parse(&zone.zone_type)
        .ok_or_else(|| ApiError::internal(format!("unknown zone type {}", zone.zone_type)))?;
    let children = if depth >= 4 {
        Vec::new()
    } else {
        children_of
            .get(&Some(zone.id))
            .map(|children| {
                children
                    .iter()
                    .map(|child| build_node(child, children_of, depth + 1))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default()
    };
    Ok(ZoneNode {
        zone_id: zone.id,
        name: zone.name.clone(),
        zone_type,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: i64, name: &str, zone_type: &str, parent_id: Option<i64>) -> ZoneRow {
        ZoneRow {
            id,
            name: name.to_string(),
            zone_type: zone_type.to_string(),
            code: None,
            parent_id,
        }
    }

    fn sample_zones() -> Vec<ZoneRow> {
        vec![
            zone(1, "Karnataka", "STATE", None),
            zone(2, "Mandya", "DISTRICT", Some(1)),
            zone(3, "Maddur", "TALUK", Some(2)),
            zone(4, "Kowdle", "VILLAGE", Some(3)),
            zone(5, "Mysuru", "DISTRICT", Some(1)),
        ]
    }

    #[test]
    fn tree_expands_four_levels_from_top() -> anyhow::Result<()> {
        let roots = build_tree(&sample_zones(), None).map_err(|e| anyhow::anyhow!(e.message))?;
        assert_eq!(roots.len(), 1);
        let state = &roots[0];
        assert_eq!(state.zone_type, ZoneType::State);
        assert_eq!(state.children.len(), 2);
        let mandya = state
            .children
            .iter()
            .find(|child| child.name == "Mandya")
            .expect("mandya present");
        assert_eq!(mandya.children.len(), 1);
        assert_eq!(mandya.children[0].children[0].name, "Kowdle");
        Ok(())
    }

    #[test]
    fn tree_can_root_at_a_subzone() -> anyhow::Result<()> {
        let roots =
            build_tree(&sample_zones(), Some(2)).map_err(|e| anyhow::anyhow!(e.message))?;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "Mandya");
        assert_eq!(roots[0].children.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_root_yields_empty_forest() -> anyhow::Result<()> {
        let roots =
            build_tree(&sample_zones(), Some(99)).map_err(|e| anyhow::anyhow!(e.message))?;
        assert!(roots.is_empty());
        Ok(())
    }
}
