use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use steward_core::{AutonomyConfig, AutonomyLevel, PolicyConstraints, Role, TenantId};

use super::{parse_timestamp, PolicyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPolicyRepository {
    pool: DbPool,
}

impl SqlPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn config_from_row(row: SqliteRow) -> Result<AutonomyConfig, RepositoryError> {
    let level_raw = row.try_get::<String, _>("level")?;
    let level = AutonomyLevel::parse(&level_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown autonomy level `{level_raw}`"))
    })?;

    let required_role = row
        .try_get::<Option<String>, _>("required_role")?
        .map(|value| {
            Role::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{value}`")))
        })
        .transpose()?;

    let constraints_raw = row.try_get::<String, _>("constraints_json")?;
    let constraints: PolicyConstraints = serde_json::from_str(&constraints_raw).map_err(
        |error| RepositoryError::Decode(format!("invalid constraints json: {error}")),
    )?;

    Ok(AutonomyConfig {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        action_type: row.try_get("action_type")?,
        level,
        constraints,
        required_role,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl PolicyRepository for SqlPolicyRepository {
    async fn find(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
    ) -> Result<Option<AutonomyConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT tenant_id, action_type, level, constraints_json, required_role,
                    created_at, updated_at
             FROM autonomy_config
             WHERE tenant_id = ? AND action_type = ?",
        )
        .bind(&tenant_id.0)
        .bind(action_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(config_from_row).transpose()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AutonomyConfig>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT tenant_id, action_type, level, constraints_json, required_role,
                    created_at, updated_at
             FROM autonomy_config
             WHERE tenant_id = ?
             ORDER BY action_type ASC",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(config_from_row).collect()
    }

    async fn upsert(&self, config: AutonomyConfig) -> Result<(), RepositoryError> {
        let constraints_json = serde_json::to_string(&config.constraints).map_err(|error| {
            RepositoryError::Decode(format!("could not encode constraints: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO autonomy_config (tenant_id, action_type, level, constraints_json,
                                          required_role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, action_type) DO UPDATE SET
                 level = excluded.level,
                 constraints_json = excluded.constraints_json,
                 required_role = excluded.required_role,
                 updated_at = excluded.updated_at",
        )
        .bind(&config.tenant_id.0)
        .bind(&config.action_type)
        .bind(config.level.as_str())
        .bind(constraints_json)
        .bind(config.required_role.map(|role| role.as_str()))
        .bind(config.created_at.to_rfc3339())
        .bind(config.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
