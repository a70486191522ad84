//! Credential primitives: hashing, PIN rules, opaque tokens, and JWTs.

pub mod jwt;
pub mod password;
pub mod pin;
pub mod tokens;

use serde::{Deserialize, Serialize};

/// Principal classes recognised by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Farmer,
    Buyer,
    Hauler,
    Agent,
    Admin,
}

impl Role {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "FARMER" => Some(Self::Farmer),
            "BUYER" => Some(Self::Buyer),
            "HAULER" => Some(Self::Hauler),
            "AGENT" => Some(Self::Agent),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Farmer => "FARMER",
            Self::Buyer => "BUYER",
            Self::Hauler => "HAULER",
            Self::Agent => "AGENT",
            Self::Admin => "ADMIN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_round_trips() {
        for role in [Role::Farmer, Role::Buyer, Role::Hauler, Role::Agent, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("farmer"), Some(Role::Farmer));
        assert_eq!(Role::parse("SUPERUSER"), None);
    }
}
