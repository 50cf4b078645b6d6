use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tenant::{Role, TenantId};

/// Action type of the tenant-wide default row.
pub const WILDCARD_ACTION_TYPE: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Off,
    Assisted,
    Auto,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Assisted => "assisted",
            Self::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "assisted" => Some(Self::Assisted),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Open constraint map. `max_per_day` is the only constraint the engine
/// enforces itself; anything else rides along for the dispatcher.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PolicyConstraints {
    pub fn with_max_per_day(max_per_day: u32) -> Self {
        Self { max_per_day: Some(max_per_day), extra: BTreeMap::new() }
    }
}

/// One policy row: either specific to an action type, or the tenant-wide
/// wildcard default (`action_type = "*"`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyConfig {
    pub tenant_id: TenantId,
    pub action_type: String,
    pub level: AutonomyLevel,
    pub constraints: PolicyConstraints,
    pub required_role: Option<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutonomyConfig {
    pub fn is_wildcard(&self) -> bool {
        self.action_type == WILDCARD_ACTION_TYPE
    }
}

/// The effective policy for one (tenant, action type) pair after fallback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub level: AutonomyLevel,
    pub constraints: PolicyConstraints,
    pub required_role: Option<Role>,
}

impl ResolvedPolicy {
    /// Platform default when a tenant has no configuration at all.
    pub fn platform_default() -> Self {
        Self {
            level: AutonomyLevel::Assisted,
            constraints: PolicyConstraints::default(),
            required_role: None,
        }
    }
}
