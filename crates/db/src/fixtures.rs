//! Demo data for local development. `steward seed` calls into here.

use chrono::Utc;

use steward_core::{
    ActionCard, ActorRef, AutonomyConfig, AutonomyLevel, GovernanceAction, HistoryEntry,
    PolicyConstraints, Role, Tenant, TenantId, WILDCARD_ACTION_TYPE,
};

use crate::repositories::{
    CardRepository, PolicyRepository, RepositoryError, SqlCardRepository, SqlPolicyRepository,
    SqlTenantRepository, TenantRepository,
};
use crate::DbPool;

pub const DEMO_TENANT_ID: &str = "demo";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedSummary {
    pub tenant_id: TenantId,
    pub policies_written: usize,
    pub cards_created: usize,
}

/// Seeds the demo tenant, its autonomy policies and a starter pending card.
/// Safe to run repeatedly; the card is only created while the tenant has no
/// pending cards.
pub async fn seed_demo(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let tenants = SqlTenantRepository::new(pool.clone());
    let policies = SqlPolicyRepository::new(pool.clone());
    let cards = SqlCardRepository::new(pool.clone());

    let now = Utc::now();
    let tenant_id = TenantId(DEMO_TENANT_ID.to_string());

    tenants
        .save(Tenant {
            id: tenant_id.clone(),
            name: "Demo Venue".to_string(),
            utc_offset_minutes: -300,
            created_at: now,
        })
        .await?;

    let demo_policies = [
        AutonomyConfig {
            tenant_id: tenant_id.clone(),
            action_type: WILDCARD_ACTION_TYPE.to_string(),
            level: AutonomyLevel::Assisted,
            constraints: PolicyConstraints::default(),
            required_role: None,
            created_at: now,
            updated_at: now,
        },
        AutonomyConfig {
            tenant_id: tenant_id.clone(),
            action_type: "deposit_reminder".to_string(),
            level: AutonomyLevel::Auto,
            constraints: PolicyConstraints::with_max_per_day(5),
            required_role: None,
            created_at: now,
            updated_at: now,
        },
        AutonomyConfig {
            tenant_id: tenant_id.clone(),
            action_type: "refund_deposit".to_string(),
            level: AutonomyLevel::Assisted,
            constraints: PolicyConstraints::default(),
            required_role: Some(Role::Manager),
            created_at: now,
            updated_at: now,
        },
    ];
    let policies_written = demo_policies.len();
    for policy in demo_policies {
        policies.upsert(policy).await?;
    }

    let mut cards_created = 0;
    if cards.list_pending(&tenant_id).await?.is_empty() {
        let card = ActionCard::new_pending(
            tenant_id.clone(),
            "waitlist_offer",
            "Offer the 7pm slot to the waitlist",
            "A party of four cancelled their 7pm booking; three waitlisted guests match the slot.",
            Some("Message the first matching waitlisted guest with the open slot.".to_string()),
            serde_json::json!({ "slot": "19:00", "party_size": 4 }),
            now,
        );
        let entry = HistoryEntry::new(
            tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardCreated,
            "action_card",
            &card.id.0,
            format!("Proposed waitlist_offer: {}", card.title),
            now,
        );
        cards.insert(&card, &[entry]).await?;
        cards_created = 1;
    }

    tracing::info!(
        tenant_id = %tenant_id,
        policies_written,
        cards_created,
        "demo seed complete"
    );
    Ok(SeedSummary { tenant_id, policies_written, cards_created })
}

#[cfg(test)]
mod tests {
    use steward_core::TenantId;

    use super::{seed_demo, DEMO_TENANT_ID};
    use crate::repositories::{CardRepository, PolicyRepository, SqlCardRepository, SqlPolicyRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_twice_leaves_one_pending_card() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = seed_demo(&pool).await.expect("first seed");
        assert_eq!(first.cards_created, 1);

        let second = seed_demo(&pool).await.expect("second seed");
        assert_eq!(second.cards_created, 0);

        let tenant_id = TenantId(DEMO_TENANT_ID.to_string());
        let cards = SqlCardRepository::new(pool.clone());
        assert_eq!(cards.list_pending(&tenant_id).await.expect("pending").len(), 1);

        let policies = SqlPolicyRepository::new(pool);
        assert_eq!(policies.list_for_tenant(&tenant_id).await.expect("policies").len(), 3);
    }
}
