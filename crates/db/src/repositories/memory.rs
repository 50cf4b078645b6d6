//! In-memory repositories backing engine unit tests and ad-hoc wiring. The
//! SQL implementations are canonical; these mirror their observable
//! semantics, including CAS behaviour and sticky feedback ratings.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use steward_core::{
    helpful_rate, ActionCard, ActorRef, AgentFeedback, AutonomyConfig, CardId, CardStatus, DayKey,
    FeedbackRating, FeedbackStats, HistoryEntry, HistoryFilter, Tenant, TenantId,
};

use super::{
    CardRepository, FeedbackRepository, HistoryRepository, PolicyRepository,
    RateCounterRepository, RepositoryError, TenantRepository,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        Ok(self.tenants.read().await.get(&id.0).cloned())
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        self.tenants.write().await.insert(tenant.id.0.clone(), tenant);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    configs: RwLock<HashMap<(String, String), AutonomyConfig>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn find(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
    ) -> Result<Option<AutonomyConfig>, RepositoryError> {
        let key = (tenant_id.0.clone(), action_type.to_string());
        Ok(self.configs.read().await.get(&key).cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AutonomyConfig>, RepositoryError> {
        let mut configs: Vec<AutonomyConfig> = self
            .configs
            .read()
            .await
            .values()
            .filter(|config| config.tenant_id == *tenant_id)
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        Ok(configs)
    }

    async fn upsert(&self, config: AutonomyConfig) -> Result<(), RepositoryError> {
        let key = (config.tenant_id.0.clone(), config.action_type.clone());
        self.configs.write().await.insert(key, config);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHistoryRepository {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(entry: &HistoryEntry, tenant_id: &TenantId, filter: &HistoryFilter) -> bool {
    entry.tenant_id == *tenant_id
        && filter.actor_type.map_or(true, |actor| entry.actor.actor_type == actor)
        && filter.action.map_or(true, |action| entry.action == action)
        && filter.entity_id.as_ref().map_or(true, |id| entry.entity_id == *id)
        && filter.search.as_ref().map_or(true, |term| entry.description.contains(term.as_str()))
}

#[async_trait::async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let mut entries: Vec<HistoryEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| matches(entry, tenant_id, filter))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(filter.limit as usize);
        Ok(entries)
    }
}

/// Card store that shares a ledger with [`InMemoryHistoryRepository`] so that
/// transitions and their audit rows stay coupled, as they are in SQL.
pub struct InMemoryCardRepository {
    cards: RwLock<HashMap<String, ActionCard>>,
    history: Arc<InMemoryHistoryRepository>,
}

impl InMemoryCardRepository {
    pub fn new(history: Arc<InMemoryHistoryRepository>) -> Self {
        Self { cards: RwLock::new(HashMap::new()), history }
    }
}

#[async_trait::async_trait]
impl CardRepository for InMemoryCardRepository {
    async fn find_by_id(&self, id: &CardId) -> Result<Option<ActionCard>, RepositoryError> {
        Ok(self.cards.read().await.get(&id.0).cloned())
    }

    async fn insert(
        &self,
        card: &ActionCard,
        entries: &[HistoryEntry],
    ) -> Result<(), RepositoryError> {
        self.cards.write().await.insert(card.id.0.clone(), card.clone());
        for entry in entries {
            self.history.append(entry).await?;
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: &CardId,
        from: CardStatus,
        to: CardStatus,
        resolved_by: Option<&ActorRef>,
        resolved_at: Option<DateTime<Utc>>,
        entry: &HistoryEntry,
    ) -> Result<bool, RepositoryError> {
        let mut cards = self.cards.write().await;
        let Some(card) = cards.get_mut(&id.0) else {
            return Ok(false);
        };
        if card.status != from {
            return Ok(false);
        }

        card.status = to;
        card.status_version += 1;
        card.resolved_at = resolved_at;
        card.resolved_by = resolved_by.cloned();
        self.history.append(entry).await?;
        Ok(true)
    }

    async fn record_external_ref(
        &self,
        id: &CardId,
        external_ref: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(card) = self.cards.write().await.get_mut(&id.0) {
            card.external_ref = Some(external_ref.to_string());
        }
        Ok(())
    }

    async fn list_pending(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ActionCard>, RepositoryError> {
        let mut pending: Vec<ActionCard> = self
            .cards
            .read()
            .await
            .values()
            .filter(|card| card.tenant_id == *tenant_id && card.status == CardStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ActionCard>, RepositoryError> {
        let mut stale: Vec<ActionCard> = self
            .cards
            .read()
            .await
            .values()
            .filter(|card| card.status == CardStatus::Pending && card.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(stale)
    }
}

#[derive(Default)]
pub struct InMemoryRateCounterRepository {
    counters: RwLock<HashMap<(String, String, String), u32>>,
}

impl InMemoryRateCounterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn counter_key(tenant_id: &TenantId, action_type: &str, day: &DayKey) -> (String, String, String) {
    (tenant_id.0.clone(), action_type.to_string(), day.0.clone())
}

#[async_trait::async_trait]
impl RateCounterRepository for InMemoryRateCounterRepository {
    async fn try_reserve(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
        max_per_day: u32,
    ) -> Result<bool, RepositoryError> {
        let mut counters = self.counters.write().await;
        let used = counters.entry(counter_key(tenant_id, action_type, day)).or_insert(0);
        if *used >= max_per_day {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }

    async fn record(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError> {
        let mut counters = self.counters.write().await;
        *counters.entry(counter_key(tenant_id, action_type, day)).or_insert(0) += 1;
        Ok(())
    }

    async fn release(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError> {
        let mut counters = self.counters.write().await;
        if let Some(used) = counters.get_mut(&counter_key(tenant_id, action_type, day)) {
            *used = used.saturating_sub(1);
        }
        Ok(())
    }

    async fn used(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<u32, RepositoryError> {
        let counters = self.counters.read().await;
        Ok(counters.get(&counter_key(tenant_id, action_type, day)).copied().unwrap_or(0))
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    rows: RwLock<HashMap<String, AgentFeedback>>,
}

impl InMemoryFeedbackRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn rate(&self, feedback: AgentFeedback) -> Result<AgentFeedback, RepositoryError> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .entry(feedback.card_id.0.clone())
            .and_modify(|existing| {
                if let Some(comment) = feedback.comment.clone() {
                    existing.comment = Some(comment);
                }
                existing.updated_at = feedback.updated_at;
            })
            .or_insert(feedback);
        Ok(stored.clone())
    }

    async fn find(&self, card_id: &CardId) -> Result<Option<AgentFeedback>, RepositoryError> {
        Ok(self.rows.read().await.get(&card_id.0).cloned())
    }

    async fn stats(
        &self,
        tenant_id: &TenantId,
        type_filter: Option<&str>,
    ) -> Result<FeedbackStats, RepositoryError> {
        let rows = self.rows.read().await;
        let mut stats = FeedbackStats::default();
        for feedback in rows.values() {
            if feedback.tenant_id != *tenant_id {
                continue;
            }
            if type_filter.is_some_and(|filter| feedback.action_type != filter) {
                continue;
            }

            let entry = stats.by_type.entry(feedback.action_type.clone()).or_default();
            entry.total += 1;
            stats.total += 1;
            match feedback.rating {
                FeedbackRating::Helpful => {
                    entry.helpful += 1;
                    stats.helpful += 1;
                }
                FeedbackRating::NotHelpful => {
                    entry.not_helpful += 1;
                    stats.not_helpful += 1;
                }
            }
        }
        for entry in stats.by_type.values_mut() {
            entry.helpful_rate = helpful_rate(entry.helpful, entry.total);
        }
        stats.helpful_rate = helpful_rate(stats.helpful, stats.total);
        Ok(stats)
    }
}
