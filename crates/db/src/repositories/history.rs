use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use steward_core::{
    ActorRef, ActorType, GovernanceAction, HistoryEntry, HistoryFilter, StatusDiff, TenantId,
};

use super::{parse_timestamp, HistoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHistoryRepository {
    pool: DbPool,
}

impl SqlHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Shared insert so card transactions can write their audit rows through the
/// same encoding as standalone appends.
pub(crate) async fn insert_entry<'e, E>(executor: E, entry: &HistoryEntry) -> Result<(), RepositoryError>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let diff_json = entry
        .diff
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("could not encode diff: {error}")))?;

    sqlx::query(
        "INSERT INTO action_history (id, tenant_id, actor_type, actor_id, actor_name,
                                     action, entity_type, entity_id, description,
                                     diff_json, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.tenant_id.0)
    .bind(entry.actor.actor_type.as_str())
    .bind(entry.actor.actor_id.as_deref())
    .bind(entry.actor.actor_name.as_deref())
    .bind(entry.action.as_str())
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.description)
    .bind(diff_json)
    .bind(entry.created_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) fn entry_from_row(row: SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let actor_type_raw = row.try_get::<String, _>("actor_type")?;
    let actor_type = ActorType::parse(&actor_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown actor type `{actor_type_raw}`"))
    })?;

    let action_raw = row.try_get::<String, _>("action")?;
    let action = GovernanceAction::parse(&action_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown governance action `{action_raw}`"))
    })?;

    let diff = row
        .try_get::<Option<String>, _>("diff_json")?
        .map(|raw| {
            serde_json::from_str::<StatusDiff>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid diff json: {error}")))
        })
        .transpose()?;

    Ok(HistoryEntry {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        actor: ActorRef {
            actor_type,
            actor_id: row.try_get("actor_id")?,
            actor_name: row.try_get("actor_name")?,
        },
        action,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        description: row.try_get("description")?,
        diff,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[async_trait::async_trait]
impl HistoryRepository for SqlHistoryRepository {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError> {
        insert_entry(&self.pool, entry).await
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let actor_type = filter.actor_type.map(|value| value.as_str());
        let action = filter.action.map(|value| value.as_str());
        let search = filter.search.as_ref().map(|term| format!("%{term}%"));

        let rows = sqlx::query(
            "SELECT id, tenant_id, actor_type, actor_id, actor_name, action,
                    entity_type, entity_id, description, diff_json, created_at
             FROM action_history
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR actor_type = ?2)
               AND (?3 IS NULL OR action = ?3)
               AND (?4 IS NULL OR entity_id = ?4)
               AND (?5 IS NULL OR description LIKE ?5)
             ORDER BY created_at DESC, id DESC
             LIMIT ?6",
        )
        .bind(&tenant_id.0)
        .bind(actor_type)
        .bind(action)
        .bind(filter.entity_id.as_deref())
        .bind(search)
        .bind(i64::from(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}
