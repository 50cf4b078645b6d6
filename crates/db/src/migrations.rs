use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

const REQUIRED_TABLES: &[&str] = &[
    "tenant",
    "autonomy_config",
    "action_card",
    "rate_counter",
    "action_history",
    "agent_feedback",
];

/// Tables the migrations should have created but that are absent. Empty means
/// the schema is ready.
pub async fn missing_tables(pool: &DbPool) -> Result<Vec<&'static str>, sqlx::Error> {
    use sqlx::Row;

    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await?
        .get::<i64, _>("count");
        if count != 1 {
            missing.push(*table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "tenant",
        "autonomy_config",
        "action_card",
        "rate_counter",
        "action_history",
        "agent_feedback",
        "idx_action_card_tenant_status",
        "idx_action_card_created_at",
        "idx_action_history_tenant_created",
        "idx_action_history_entity",
        "idx_action_history_action",
        "idx_agent_feedback_tenant_type",
    ];

    #[tokio::test]
    async fn migrations_create_all_managed_objects() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(name)
            .fetch_one(&pool)
            .await
            .expect("check schema object")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{name}` to exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }

    #[tokio::test]
    async fn missing_tables_reports_an_unmigrated_database() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");

        let missing = super::missing_tables(&pool).await.expect("probe");
        assert!(missing.contains(&"tenant"));

        run_pending(&pool).await.expect("migrate");
        assert!(super::missing_tables(&pool).await.expect("probe").is_empty());
    }
}
