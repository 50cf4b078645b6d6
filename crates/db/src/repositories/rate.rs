use sqlx::Row;

use steward_core::{DayKey, TenantId};

use super::{parse_u32, RateCounterRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRateCounterRepository {
    pool: DbPool,
}

impl SqlRateCounterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateCounterRepository for SqlRateCounterRepository {
    async fn try_reserve(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
        max_per_day: u32,
    ) -> Result<bool, RepositoryError> {
        if max_per_day == 0 {
            return Ok(false);
        }

        // The guarded upsert is the whole arbitration: the fresh-row insert
        // only succeeds while max_per_day >= 1, and the conflict branch only
        // bumps while capacity remains. Losers touch zero rows.
        let result = sqlx::query(
            "INSERT INTO rate_counter (tenant_id, action_type, day_key, used)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(tenant_id, action_type, day_key) DO UPDATE SET
                 used = used + 1
             WHERE used < ?4",
        )
        .bind(&tenant_id.0)
        .bind(action_type)
        .bind(&day.0)
        .bind(i64::from(max_per_day))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rate_counter (tenant_id, action_type, day_key, used)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(tenant_id, action_type, day_key) DO UPDATE SET
                 used = used + 1",
        )
        .bind(&tenant_id.0)
        .bind(action_type)
        .bind(&day.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE rate_counter SET used = used - 1
             WHERE tenant_id = ? AND action_type = ? AND day_key = ? AND used > 0",
        )
        .bind(&tenant_id.0)
        .bind(action_type)
        .bind(&day.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn used(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        day: &DayKey,
    ) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "SELECT used FROM rate_counter
             WHERE tenant_id = ? AND action_type = ? AND day_key = ?",
        )
        .bind(&tenant_id.0)
        .bind(action_type)
        .bind(&day.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => parse_u32("used", row.try_get("used")?),
            None => Ok(0),
        }
    }
}
