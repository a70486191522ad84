//! Zone tree types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Administrative levels, root to leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneType {
    State,
    District,
    Taluk,
    Village,
}

impl ZoneType {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "STATE" => Some(Self::State),
            "DISTRICT" => Some(Self::District),
            "TALUK" => Some(Self::Taluk),
            "VILLAGE" => Some(Self::Village),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "STATE",
            Self::District => "DISTRICT",
            Self::Taluk => "TALUK",
            Self::Village => "VILLAGE",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    pub zone_id: i64,
    pub name: String,
    pub zone_type: ZoneType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// Agents currently assigned under this zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_count: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ZoneListResponse {
    pub success: bool,
    pub zones: Vec<ZoneView>,
}

/// Eagerly expanded subtree, four levels deep at most.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ZoneNode {
    pub zone_id: i64,
    pub name: String,
    pub zone_type: ZoneType,
    #[schema(no_recursion)]
    pub children: Vec<ZoneNode>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ZoneHierarchyResponse {
    pub success: bool,
    pub roots: Vec<ZoneNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_type_round_trips() {
        for zone_type in [
            ZoneType::State,
            ZoneType::District,
            ZoneType::Taluk,
            ZoneType::Village,
        ] {
            assert_eq!(ZoneType::parse(zone_type.as_str()), Some(zone_type));
        }
        assert_eq!(ZoneType::parse("WARD"), None);
    }
}
