use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use steward_core::{ActionCard, ActorRef, ActorType, CardId, CardStatus, HistoryEntry, TenantId};

use super::{
    history::insert_entry, parse_optional_timestamp, parse_timestamp, parse_u32, CardRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlCardRepository {
    pool: DbPool,
}

impl SqlCardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CARD_COLUMNS: &str = "id, tenant_id, action_type, title, description, suggested_action,
                            status, payload_json, external_ref, status_version, created_at,
                            resolved_at, resolved_by_type, resolved_by_id";

fn card_from_row(row: SqliteRow) -> Result<ActionCard, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CardStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown card status `{status_raw}`")))?;

    let payload_raw = row.try_get::<String, _>("payload_json")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload json: {error}")))?;

    let resolved_by = row
        .try_get::<Option<String>, _>("resolved_by_type")?
        .map(|raw| {
            let actor_type = ActorType::parse(&raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown actor type `{raw}`"))
            })?;
            Ok::<_, RepositoryError>(ActorRef {
                actor_type,
                actor_id: row.try_get("resolved_by_id")?,
                actor_name: None,
            })
        })
        .transpose()?;

    Ok(ActionCard {
        id: CardId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        action_type: row.try_get("action_type")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        suggested_action: row.try_get("suggested_action")?,
        status,
        payload,
        external_ref: row.try_get("external_ref")?,
        status_version: parse_u32("status_version", row.try_get("status_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        resolved_by,
    })
}

#[async_trait::async_trait]
impl CardRepository for SqlCardRepository {
    async fn find_by_id(&self, id: &CardId) -> Result<Option<ActionCard>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CARD_COLUMNS} FROM action_card WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(card_from_row).transpose()
    }

    async fn insert(
        &self,
        card: &ActionCard,
        entries: &[HistoryEntry],
    ) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(&card.payload).map_err(|error| {
            RepositoryError::Decode(format!("could not encode payload: {error}"))
        })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO action_card (id, tenant_id, action_type, title, description,
                                      suggested_action, status, payload_json, external_ref,
                                      status_version, created_at, resolved_at,
                                      resolved_by_type, resolved_by_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&card.id.0)
        .bind(&card.tenant_id.0)
        .bind(&card.action_type)
        .bind(&card.title)
        .bind(&card.description)
        .bind(&card.suggested_action)
        .bind(card.status.as_str())
        .bind(payload_json)
        .bind(card.external_ref.as_deref())
        .bind(i64::from(card.status_version))
        .bind(card.created_at.to_rfc3339())
        .bind(card.resolved_at.map(|at| at.to_rfc3339()))
        .bind(card.resolved_by.as_ref().map(|actor| actor.actor_type.as_str()))
        .bind(card.resolved_by.as_ref().and_then(|actor| actor.actor_id.as_deref()))
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            insert_entry(&mut *tx, entry).await?;
        }

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE action_card
             SET status = ?,
                 status_version = status_version + 1,
                 resolved_at = ?,
                 resolved_by_type = ?,
                 resolved_by_id = ?
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(resolved_at.map(|at| at.to_rfc3339()))
        .bind(resolved_by.map(|actor| actor.actor_type.as_str()))
        .bind(resolved_by.and_then(|actor| actor.actor_id.as_deref()))
        .bind(&id.0)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race; nothing to audit.
            tx.rollback().await?;
            return Ok(false);
        }

        insert_entry(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_external_ref(
        &self,
        id: &CardId,
        external_ref: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE action_card SET external_ref = ? WHERE id = ?")
            .bind(external_ref)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_pending(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ActionCard>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM action_card
             WHERE tenant_id = ? AND status = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .bind(CardStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(card_from_row).collect()
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ActionCard>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM action_card
             WHERE status = ? AND created_at < ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(CardStatus::Pending.as_str())
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(card_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use steward_core::{
        ActionCard, ActorRef, CardStatus, GovernanceAction, HistoryEntry, HistoryFilter, Tenant,
        TenantId,
    };

    use super::SqlCardRepository;
    use crate::repositories::{
        CardRepository, HistoryRepository, SqlHistoryRepository, SqlTenantRepository,
        TenantRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let tenants = SqlTenantRepository::new(pool.clone());
        tenants
            .save(Tenant {
                id: TenantId("t-1".to_string()),
                name: "Demo".to_string(),
                utc_offset_minutes: 0,
                created_at: Utc::now(),
            })
            .await
            .expect("insert tenant");
        pool
    }

    fn pending_card(action_type: &str) -> ActionCard {
        ActionCard::new_pending(
            TenantId("t-1".to_string()),
            action_type,
            "Send deposit reminder",
            "Guest has an unpaid deposit due in 48 hours.",
            Some("Send the standard deposit reminder message.".to_string()),
            serde_json::json!({"booking_id": "b-77"}),
            Utc::now(),
        )
    }

    fn created_entry(card: &ActionCard) -> HistoryEntry {
        HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardCreated,
            "action_card",
            &card.id.0,
            "card created",
            card.created_at,
        )
    }

    #[tokio::test]
    async fn insert_writes_card_and_audit_atomically() {
        let pool = setup().await;
        let cards = SqlCardRepository::new(pool.clone());
        let history = SqlHistoryRepository::new(pool);

        let card = pending_card("deposit_reminder");
        cards.insert(&card, &[created_entry(&card)]).await.expect("insert");

        let found = cards.find_by_id(&card.id).await.expect("find").expect("card exists");
        assert_eq!(found.status, CardStatus::Pending);
        assert_eq!(found.status_version, 1);
        assert_eq!(found.payload["booking_id"], "b-77");

        let entries = history
            .list(&card.tenant_id, &HistoryFilter::for_entity(&card.id.0))
            .await
            .expect("list history");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, GovernanceAction::CardCreated);
    }

    #[tokio::test]
    async fn transition_applies_once_per_source_status() {
        let pool = setup().await;
        let cards = SqlCardRepository::new(pool.clone());
        let history = SqlHistoryRepository::new(pool);

        let card = pending_card("deposit_reminder");
        cards.insert(&card, &[created_entry(&card)]).await.expect("insert");

        let now = Utc::now();
        let approver = ActorRef::staff("u-1");
        let approve_entry = HistoryEntry::new(
            card.tenant_id.clone(),
            approver.clone(),
            GovernanceAction::CardApproved,
            "action_card",
            &card.id.0,
            "approved",
            now,
        )
        .with_diff(Some(CardStatus::Pending), CardStatus::Approved);

        let won = cards
            .transition(
                &card.id,
                CardStatus::Pending,
                CardStatus::Approved,
                Some(&approver),
                Some(now),
                &approve_entry,
            )
            .await
            .expect("first transition");
        assert!(won);

        let dismiss_entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::staff("u-2"),
            GovernanceAction::CardDismissed,
            "action_card",
            &card.id.0,
            "dismissed",
            now,
        );
        let lost = cards
            .transition(
                &card.id,
                CardStatus::Pending,
                CardStatus::Dismissed,
                Some(&ActorRef::staff("u-2")),
                Some(now),
                &dismiss_entry,
            )
            .await
            .expect("second transition");
        assert!(!lost, "a second resolution from PENDING must lose the CAS");

        let found = cards.find_by_id(&card.id).await.expect("find").expect("card exists");
        assert_eq!(found.status, CardStatus::Approved);
        assert_eq!(found.status_version, 2);
        assert_eq!(
            found.resolved_by.expect("resolved_by set").actor_id.as_deref(),
            Some("u-1")
        );

        // The losing branch must leave no audit row behind.
        let entries = history
            .list(&card.tenant_id, &HistoryFilter::for_entity(&card.id.0))
            .await
            .expect("list history");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.action != GovernanceAction::CardDismissed));
    }

    #[tokio::test]
    async fn compensating_transition_clears_resolution_fields() {
        let pool = setup().await;
        let cards = SqlCardRepository::new(pool.clone());

        let card = pending_card("waitlist_offer");
        cards.insert(&card, &[created_entry(&card)]).await.expect("insert");

        let now = Utc::now();
        let claim_entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardAutoExecuted,
            "action_card",
            &card.id.0,
            "auto-executed",
            now,
        );
        assert!(cards
            .transition(
                &card.id,
                CardStatus::Pending,
                CardStatus::Executed,
                Some(&ActorRef::ai()),
                Some(now),
                &claim_entry,
            )
            .await
            .expect("claim"));

        let revert_entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::system(),
            GovernanceAction::CardAutoExecutionFailed,
            "action_card",
            &card.id.0,
            "dispatch failed, card returned to pending",
            now,
        );
        assert!(cards
            .transition(&card.id, CardStatus::Executed, CardStatus::Pending, None, None, &revert_entry)
            .await
            .expect("revert"));

        let found = cards.find_by_id(&card.id).await.expect("find").expect("card exists");
        assert_eq!(found.status, CardStatus::Pending);
        assert_eq!(found.status_version, 3);
        assert!(found.resolved_at.is_none());
        assert!(found.resolved_by.is_none());
    }

    #[tokio::test]
    async fn external_ref_round_trip() {
        let pool = setup().await;
        let cards = SqlCardRepository::new(pool);

        let card = pending_card("deposit_reminder");
        cards.insert(&card, &[created_entry(&card)]).await.expect("insert");

        cards.record_external_ref(&card.id, "msg-12345").await.expect("record ref");
        let found = cards.find_by_id(&card.id).await.expect("find").expect("card exists");
        assert_eq!(found.external_ref.as_deref(), Some("msg-12345"));
    }

    #[tokio::test]
    async fn pending_listings_filter_by_status_and_age() {
        let pool = setup().await;
        let cards = SqlCardRepository::new(pool);

        let mut old = pending_card("deposit_reminder");
        old.created_at = Utc::now() - Duration::hours(100);
        let fresh = pending_card("waitlist_offer");
        cards.insert(&old, &[created_entry(&old)]).await.expect("insert old");
        cards.insert(&fresh, &[created_entry(&fresh)]).await.expect("insert fresh");

        let resolved = pending_card("deposit_reminder");
        cards.insert(&resolved, &[created_entry(&resolved)]).await.expect("insert resolved");
        let entry = HistoryEntry::new(
            resolved.tenant_id.clone(),
            ActorRef::staff("u-1"),
            GovernanceAction::CardDismissed,
            "action_card",
            &resolved.id.0,
            "dismissed",
            Utc::now(),
        );
        assert!(cards
            .transition(
                &resolved.id,
                CardStatus::Pending,
                CardStatus::Dismissed,
                Some(&ActorRef::staff("u-1")),
                Some(Utc::now()),
                &entry,
            )
            .await
            .expect("dismiss"));

        let pending = cards.list_pending(&TenantId("t-1".to_string())).await.expect("pending");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, old.id, "oldest pending card comes first");

        let stale = cards
            .list_pending_created_before(Utc::now() - Duration::hours(72))
            .await
            .expect("stale");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }
}
