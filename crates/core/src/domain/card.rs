use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::history::ActorRef;
use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId(pub String);

impl CardId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Pending,
    Approved,
    Dismissed,
    Executed,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Dismissed => "dismissed",
            Self::Executed => "executed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "dismissed" => Some(Self::Dismissed),
            "executed" => Some(Self::Executed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dismissed | Self::Executed | Self::Expired)
    }
}

/// Legal status edges. Everything flows out of `Pending`; `Approved` cards
/// move on to `Executed` once dispatch succeeds; `Executed -> Pending` is the
/// single compensation edge for an automatic dispatch that failed downstream.
pub fn check_transition(from: CardStatus, to: CardStatus) -> Result<(), DomainError> {
    let allowed = matches!(
        (from, to),
        (CardStatus::Pending, CardStatus::Approved)
            | (CardStatus::Pending, CardStatus::Dismissed)
            | (CardStatus::Pending, CardStatus::Executed)
            | (CardStatus::Pending, CardStatus::Expired)
            | (CardStatus::Approved, CardStatus::Executed)
            | (CardStatus::Executed, CardStatus::Pending)
    );
    if allowed {
        Ok(())
    } else {
        Err(DomainError::InvalidCardTransition { from, to })
    }
}

/// One proposed action working its way through governance. Mutated only by
/// the engine; retained forever once terminal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCard {
    pub id: CardId,
    pub tenant_id: TenantId,
    pub action_type: String,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub status: CardStatus,
    /// Opaque payload handed to the dispatcher; the engine never interprets it.
    pub payload: serde_json::Value,
    /// Reference returned by the dispatcher once the action ran downstream.
    pub external_ref: Option<String>,
    /// Optimistic-concurrency counter bumped on every status change.
    pub status_version: u32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ActorRef>,
}

impl ActionCard {
    pub fn new_pending(
        tenant_id: TenantId,
        action_type: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        suggested_action: Option<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CardId::generate(),
            tenant_id,
            action_type: action_type.into(),
            title: title.into(),
            description: description.into(),
            suggested_action,
            status: CardStatus::Pending,
            payload,
            external_ref: None,
            status_version: 1,
            created_at,
            resolved_at: None,
            resolved_by: None,
        }
    }
}
