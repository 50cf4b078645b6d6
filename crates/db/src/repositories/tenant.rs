use sqlx::Row;

use steward_core::{Tenant, TenantId};

use super::{parse_timestamp, RepositoryError, TenantRepository};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, utc_offset_minutes, created_at FROM tenant WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Tenant {
                id: TenantId(row.try_get("id")?),
                name: row.try_get("name")?,
                utc_offset_minutes: row.try_get::<i64, _>("utc_offset_minutes")? as i32,
                created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenant (id, name, utc_offset_minutes, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 utc_offset_minutes = excluded.utc_offset_minutes",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.name)
        .bind(i64::from(tenant.utc_offset_minutes))
        .bind(tenant.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use steward_core::{Tenant, TenantId};

    use super::SqlTenantRepository;
    use crate::repositories::TenantRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup().await;
        let repo = SqlTenantRepository::new(pool);

        let tenant = Tenant {
            id: TenantId("t-1".to_string()),
            name: "North Shore Clinic".to_string(),
            utc_offset_minutes: -300,
            created_at: Utc::now(),
        };
        repo.save(tenant.clone()).await.expect("save tenant");

        let found = repo
            .find_by_id(&TenantId("t-1".to_string()))
            .await
            .expect("find tenant")
            .expect("tenant exists");
        assert_eq!(found.name, "North Shore Clinic");
        assert_eq!(found.utc_offset_minutes, -300);
    }

    #[tokio::test]
    async fn find_missing_tenant_returns_none() {
        let pool = setup().await;
        let repo = SqlTenantRepository::new(pool);

        let found = repo.find_by_id(&TenantId("ghost".to_string())).await.expect("query");
        assert!(found.is_none());
    }
}
