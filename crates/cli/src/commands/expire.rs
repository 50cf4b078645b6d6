use std::sync::Arc;

use chrono::{Duration, Utc};

use steward_core::config::{AppConfig, LoadOptions};
use steward_core::{CardId, DispatchError};
use steward_db::repositories::{
    SqlCardRepository, SqlFeedbackRepository, SqlHistoryRepository, SqlPolicyRepository,
    SqlRateCounterRepository, SqlTenantRepository,
};
use steward_db::connect_with_settings;
use steward_engine::{
    Dispatcher, EngineConfig, ExternalRef, GovernanceEngine, StaticRoleDirectory,
};

use crate::commands::CommandResult;

/// The sweep never dispatches; anything that tries anyway is refused.
struct DisabledDispatcher;

#[async_trait::async_trait]
impl Dispatcher for DisabledDispatcher {
    async fn dispatch(
        &self,
        _action_type: &str,
        _card_id: &CardId,
        _payload: &serde_json::Value,
    ) -> Result<ExternalRef, DispatchError> {
        Err(DispatchError::Rejected("dispatch is disabled in the operator CLI".to_string()))
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "expire",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "expire",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let engine = GovernanceEngine::new(
            Arc::new(SqlTenantRepository::new(pool.clone())),
            Arc::new(SqlPolicyRepository::new(pool.clone())),
            Arc::new(SqlCardRepository::new(pool.clone())),
            Arc::new(SqlRateCounterRepository::new(pool.clone())),
            Arc::new(SqlHistoryRepository::new(pool.clone())),
            Arc::new(SqlFeedbackRepository::new(pool.clone())),
            Arc::new(DisabledDispatcher),
            Arc::new(StaticRoleDirectory::new()),
            EngineConfig {
                pending_expiry: Duration::hours(config.governance.pending_expiry_hours),
            },
        );

        let expired = engine
            .expire_stale(Utc::now())
            .await
            .map_err(|error| ("expire_sweep", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(expired)
    });

    match result {
        Ok(expired) => CommandResult::success(
            "expire",
            format!("expired {expired} stale pending card(s)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}
