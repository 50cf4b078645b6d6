use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::card::CardStatus;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Staff,
    Ai,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "staff" => Some(Self::Staff),
            "ai" => Some(Self::Ai),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Who caused a governance event. Id and display name are absent for the
/// automation layer and system-driven transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
}

impl ActorRef {
    pub fn staff(actor_id: impl Into<String>) -> Self {
        Self { actor_type: ActorType::Staff, actor_id: Some(actor_id.into()), actor_name: None }
    }

    pub fn ai() -> Self {
        Self { actor_type: ActorType::Ai, actor_id: None, actor_name: None }
    }

    pub fn system() -> Self {
        Self { actor_type: ActorType::System, actor_id: None, actor_name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = Some(name.into());
        self
    }
}

/// Governance-relevant event labels, encoded dotted for storage and filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAction {
    CardCreated,
    CardSuppressed,
    CardAutoExecuted,
    CardAutoExecutionFailed,
    CardRateLimited,
    CardApproved,
    CardExecuted,
    CardDispatchFailed,
    CardDismissed,
    CardExpired,
    PolicyUpdated,
}

impl GovernanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardCreated => "card.created",
            Self::CardSuppressed => "card.suppressed",
            Self::CardAutoExecuted => "card.auto_executed",
            Self::CardAutoExecutionFailed => "card.auto_execution_failed",
            Self::CardRateLimited => "card.rate_limited",
            Self::CardApproved => "card.approved",
            Self::CardExecuted => "card.executed",
            Self::CardDispatchFailed => "card.dispatch_failed",
            Self::CardDismissed => "card.dismissed",
            Self::CardExpired => "card.expired",
            Self::PolicyUpdated => "policy.updated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "card.created" => Some(Self::CardCreated),
            "card.suppressed" => Some(Self::CardSuppressed),
            "card.auto_executed" => Some(Self::CardAutoExecuted),
            "card.auto_execution_failed" => Some(Self::CardAutoExecutionFailed),
            "card.rate_limited" => Some(Self::CardRateLimited),
            "card.approved" => Some(Self::CardApproved),
            "card.executed" => Some(Self::CardExecuted),
            "card.dispatch_failed" => Some(Self::CardDispatchFailed),
            "card.dismissed" => Some(Self::CardDismissed),
            "card.expired" => Some(Self::CardExpired),
            "policy.updated" => Some(Self::PolicyUpdated),
            _ => None,
        }
    }
}

/// Before/after snapshot attached to entries that record a status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDiff {
    pub before: Option<CardStatus>,
    pub after: CardStatus,
}

/// One immutable audit-ledger row. Never mutated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub tenant_id: TenantId,
    pub actor: ActorRef,
    pub action: GovernanceAction,
    pub entity_type: String,
    pub entity_id: String,
    pub description: String,
    pub diff: Option<StatusDiff>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        tenant_id: TenantId,
        actor: ActorRef,
        action: GovernanceAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            actor,
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            description: description.into(),
            diff: None,
            created_at,
        }
    }

    pub fn with_diff(mut self, before: Option<CardStatus>, after: CardStatus) -> Self {
        self.diff = Some(StatusDiff { before, after });
        self
    }
}

/// Read-side filter for the operator audit views. Every field is optional;
/// `limit` caps the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryFilter {
    pub actor_type: Option<ActorType>,
    pub action: Option<GovernanceAction>,
    pub entity_id: Option<String>,
    pub search: Option<String>,
    pub limit: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self { actor_type: None, action: None, entity_id: None, search: None, limit: 100 }
    }
}

impl HistoryFilter {
    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self { entity_id: Some(entity_id.into()), ..Self::default() }
    }
}
