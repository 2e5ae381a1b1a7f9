//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

/// Operator privilege level, ordered by increasing privilege.
///
/// The derived `Ord` gives `Viewer < Operator < Admin`, which is the total
/// order used by the authorization gate: a principal passes a role check when
/// its persisted role is greater than or equal to the required one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "power_unit_status", rename_all = "snake_case")]
pub enum PowerUnitStatus {
    Online,
    Offline,
    Maintenance,
    Fault,
}

impl PowerUnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerUnitStatus::Online => "online",
            PowerUnitStatus::Offline => "offline",
            PowerUnitStatus::Maintenance => "maintenance",
            PowerUnitStatus::Fault => "fault",
        }
    }
}
