use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use steward_core::{
    ActionCard, ActorRef, AgentFeedback, AutonomyConfig, CardId, CardStatus, DayKey,
    FeedbackStats, HistoryEntry, HistoryFilter, Tenant, TenantId,
};

pub mod card;
pub mod feedback;
pub mod history;
pub mod memory;
pub mod policy;
pub mod rate;
pub mod tenant;

pub use card::SqlCardRepository;
pub use feedback::SqlFeedbackRepository;
pub use history::SqlHistoryRepository;
pub use memory::{
    InMemoryCardRepository, InMemoryFeedbackRepository, InMemoryHistoryRepository,
    InMemoryPolicyRepository, InMemoryRateCounterRepository, InMemoryTenantRepository,
};
pub use policy::SqlPolicyRepository;
pub use rate::SqlRateCounterRepository;
pub use tenant::SqlTenantRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError>;
    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn find(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
    ) -> Result<Option<AutonomyConfig>, RepositoryError>;

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AutonomyConfig>, RepositoryError>;

    async fn upsert(&self, config: AutonomyConfig) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn find_by_id(&self, id: &CardId) -> Result<Option<ActionCard>, RepositoryError>;

    /// Inserts a new card together with its audit entries in one transaction.
    async fn insert(
        &self,
        card: &ActionCard,
        entries: &[HistoryEntry],
    ) -> Result<(), RepositoryError>;

    /// Compare-and-set on the card status. The update applies only while the
    /// card still sits in `from`; the audit entry commits in the same
    /// transaction. Returns `false` when the CAS lost the race.
    async fn transition(
        &self,
        id: &CardId,
        from: CardStatus,
        to: CardStatus,
        resolved_by: Option<&ActorRef>,
        resolved_at: Option<DateTime<Utc>>,
        entry: &HistoryEntry,
    ) -> Result<bool, RepositoryError>;

    /// Records the dispatcher's reference on an already-transitioned card.
    async fn record_external_ref(
        &self,
        id: &CardId,
        external_ref: &str,
    ) -> Result<(), RepositoryError>;

    async fn list_pending(&self, tenant_id: &TenantId)
        -> Result<Vec<ActionCard>, RepositoryError>;

    /// Pending cards older than the cutoff, across all tenants. Feeds the
    /// expiry sweep.
    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ActionCard>, RepositoryError>;
}

#[async_trait]
pub trait RateCounterRepository: Send + Sync {
    /// Atomically consumes one unit of capacity if fewer than `max_per_day`
    /// units are used for the day window. Exactly one of any set of racing
    /// callers gets the last unit.
    async fn try_reserve(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
        max_per_day: u32,
    ) -> Result<bool, RepositoryError>;

    /// Unconditional increment, used when no ceiling applies but the counter
    /// must still reflect the dispatch.
    async fn record(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError>;

    /// Compensates a reservation whose dispatch failed.
    async fn release(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError>;

    async fn used(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Appends an entry outside of a card transaction (suppressed proposals,
    /// policy updates, dispatch failures that change no status).
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError>;

    /// Entries for a tenant, newest first, honouring the filter.
    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Upserts a rating with sticky semantics: an existing rating keeps its
    /// value and only the comment is replaced. Returns the stored row.
    async fn rate(&self, feedback: AgentFeedback) -> Result<AgentFeedback, RepositoryError>;

    async fn find(&self, card_id: &CardId) -> Result<Option<AgentFeedback>, RepositoryError>;

    async fn stats(
        &self,
        tenant_id: &TenantId,
        type_filter: Option<&str>,
    ) -> Result<FeedbackStats, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
