use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use steward_core::{
    AgentFeedback, CardId, FeedbackRating, FeedbackStats, TenantId, TypeStats, helpful_rate,
};

use super::{parse_timestamp, FeedbackRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn feedback_from_row(row: SqliteRow) -> Result<AgentFeedback, RepositoryError> {
    let rating_raw = row.try_get::<String, _>("rating")?;
    let rating = FeedbackRating::parse(&rating_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown feedback rating `{rating_raw}`"))
    })?;

    Ok(AgentFeedback {
        card_id: CardId(row.try_get("card_id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        action_type: row.try_get("action_type")?,
        rating,
        comment: row.try_get("comment")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn rate(&self, feedback: AgentFeedback) -> Result<AgentFeedback, RepositoryError> {
        // First rating wins; repeats may only add or refresh the comment,
        // never clear one already stored.
        sqlx::query(
            "INSERT INTO agent_feedback (card_id, tenant_id, action_type, rating, comment,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(card_id) DO UPDATE SET
                 comment = COALESCE(excluded.comment, comment),
                 updated_at = excluded.updated_at",
        )
        .bind(&feedback.card_id.0)
        .bind(&feedback.tenant_id.0)
        .bind(&feedback.action_type)
        .bind(feedback.rating.as_str())
        .bind(feedback.comment.as_deref())
        .bind(feedback.created_at.to_rfc3339())
        .bind(feedback.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let stored = self.find(&feedback.card_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "feedback row for card `{}` vanished after upsert",
                feedback.card_id
            ))
        })?;
        Ok(stored)
    }

    async fn find(&self, card_id: &CardId) -> Result<Option<AgentFeedback>, RepositoryError> {
        let row = sqlx::query(
            "SELECT card_id, tenant_id, action_type, rating, comment, created_at, updated_at
             FROM agent_feedback
             WHERE card_id = ?",
        )
        .bind(&card_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(feedback_from_row).transpose()
    }

    async fn stats(
        &self,
        tenant_id: &TenantId,
        type_filter: Option<&str>,
    ) -> Result<FeedbackStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT action_type,
                    COUNT(*) AS total,
                    SUM(CASE WHEN rating = 'helpful' THEN 1 ELSE 0 END) AS helpful
             FROM agent_feedback
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR action_type = ?2)
             GROUP BY action_type
             ORDER BY action_type ASC",
        )
        .bind(&tenant_id.0)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = FeedbackStats::default();
        for row in rows {
            let action_type = row.try_get::<String, _>("action_type")?;
            let total = row.try_get::<i64, _>("total")? as u64;
            let helpful = row.try_get::<i64, _>("helpful")? as u64;
            let not_helpful = total - helpful;

            stats.total += total;
            stats.helpful += helpful;
            stats.not_helpful += not_helpful;
            stats.by_type.insert(
                action_type,
                TypeStats {
                    total,
                    helpful,
                    not_helpful,
                    helpful_rate: helpful_rate(helpful, total),
                },
            );
        }
        stats.helpful_rate = helpful_rate(stats.helpful, stats.total);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use steward_core::{
        ActionCard, ActorRef, AgentFeedback, CardId, FeedbackRating, GovernanceAction,
        HistoryEntry, Tenant, TenantId,
    };

    use super::SqlFeedbackRepository;
    use crate::repositories::{
        CardRepository, FeedbackRepository, SqlCardRepository, SqlTenantRepository,
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

    async fn insert_card(pool: &sqlx::SqlitePool, action_type: &str) -> CardId {
        let cards = SqlCardRepository::new(pool.clone());
        let card = ActionCard::new_pending(
            TenantId("t-1".to_string()),
            action_type,
            "Card",
            "Description",
            None,
            serde_json::Value::Null,
            Utc::now(),
        );
        let entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardCreated,
            "action_card",
            &card.id.0,
            "card created",
            card.created_at,
        );
        cards.insert(&card, &[entry]).await.expect("insert card");
        card.id
    }

    fn feedback(card_id: &CardId, action_type: &str, rating: FeedbackRating) -> AgentFeedback {
        let now = Utc::now();
        AgentFeedback {
            card_id: card_id.clone(),
            tenant_id: TenantId("t-1".to_string()),
            action_type: action_type.to_string(),
            rating,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn first_rating_sticks_and_comment_refreshes() {
        let pool = setup().await;
        let card_id = insert_card(&pool, "deposit_reminder").await;
        let repo = SqlFeedbackRepository::new(pool);

        let mut first = feedback(&card_id, "deposit_reminder", FeedbackRating::Helpful);
        first.comment = Some("good catch".to_string());
        let stored = repo.rate(first).await.expect("first rate");
        assert_eq!(stored.rating, FeedbackRating::Helpful);

        let mut second = feedback(&card_id, "deposit_reminder", FeedbackRating::NotHelpful);
        second.comment = Some("changed my mind about the comment".to_string());
        second.updated_at = Utc::now() + Duration::seconds(5);
        let stored = repo.rate(second).await.expect("second rate");

        assert_eq!(stored.rating, FeedbackRating::Helpful, "rating must not flip");
        assert_eq!(stored.comment.as_deref(), Some("changed my mind about the comment"));
        assert!(stored.updated_at > stored.created_at);
    }

    #[tokio::test]
    async fn repeat_without_comment_keeps_the_stored_comment() {
        let pool = setup().await;
        let card_id = insert_card(&pool, "deposit_reminder").await;
        let repo = SqlFeedbackRepository::new(pool);

        let mut first = feedback(&card_id, "deposit_reminder", FeedbackRating::Helpful);
        first.comment = Some("good catch".to_string());
        repo.rate(first).await.expect("first rate");

        let stored = repo
            .rate(feedback(&card_id, "deposit_reminder", FeedbackRating::Helpful))
            .await
            .expect("comment-less repeat");
        assert_eq!(stored.comment.as_deref(), Some("good catch"));
    }

    #[tokio::test]
    async fn stats_aggregate_per_action_type() {
        let pool = setup().await;
        let a = insert_card(&pool, "deposit_reminder").await;
        let b = insert_card(&pool, "deposit_reminder").await;
        let c = insert_card(&pool, "waitlist_offer").await;
        let repo = SqlFeedbackRepository::new(pool);

        repo.rate(feedback(&a, "deposit_reminder", FeedbackRating::Helpful))
            .await
            .expect("rate a");
        repo.rate(feedback(&b, "deposit_reminder", FeedbackRating::NotHelpful))
            .await
            .expect("rate b");
        repo.rate(feedback(&c, "waitlist_offer", FeedbackRating::Helpful))
            .await
            .expect("rate c");

        let stats = repo.stats(&TenantId("t-1".to_string()), None).await.expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.helpful, 2);
        assert_eq!(stats.not_helpful, 1);
        assert_eq!(stats.helpful_rate, 67);

        let reminders = stats.by_type.get("deposit_reminder").expect("reminder stats");
        assert_eq!(reminders.total, 2);
        assert_eq!(reminders.helpful_rate, 50);

        let filtered = repo
            .stats(&TenantId("t-1".to_string()), Some("waitlist_offer"))
            .await
            .expect("filtered stats");
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.by_type.len(), 1);
    }

    #[tokio::test]
    async fn stats_for_empty_tenant_are_all_zero() {
        let pool = setup().await;
        let repo = SqlFeedbackRepository::new(pool);

        let stats = repo.stats(&TenantId("t-1".to_string()), None).await.expect("stats");
        assert_eq!(stats.total, 0);
        assert_eq!(stats.helpful_rate, 0);
        assert!(stats.by_type.is_empty());
    }
}
