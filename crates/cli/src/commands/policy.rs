use chrono::Utc;
use serde::Serialize;

use steward_core::config::{AppConfig, LoadOptions};
use steward_core::{
    resolve_policy, ActorRef, AutonomyConfig, AutonomyLevel, GovernanceAction, HistoryEntry,
    PolicyConstraints, Role, TenantId, WILDCARD_ACTION_TYPE,
};
use steward_db::repositories::{
    HistoryRepository, PolicyRepository, SqlHistoryRepository, SqlPolicyRepository,
    SqlTenantRepository, TenantRepository,
};
use steward_db::connect_with_settings;

use crate::commands::CommandResult;
use crate::PolicyCommand;

#[derive(Debug, Serialize)]
struct PolicyRow {
    action_type: String,
    level: &'static str,
    max_per_day: Option<u32>,
    required_role: Option<&'static str>,
}

impl From<&AutonomyConfig> for PolicyRow {
    fn from(config: &AutonomyConfig) -> Self {
        Self {
            action_type: config.action_type.clone(),
            level: config.level.as_str(),
            max_per_day: config.constraints.max_per_day,
            required_role: config.required_role.map(|role| role.as_str()),
        }
    }
}

pub fn run(action: PolicyCommand) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "policy",
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
                "policy",
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

        let outcome = match action {
            PolicyCommand::Get { tenant, action_type } => {
                get_policy(&pool, &tenant, action_type.as_deref()).await
            }
            PolicyCommand::Set { tenant, action_type, level, max_per_day, required_role } => {
                set_policy(&pool, &tenant, &action_type, &level, max_per_day, required_role.as_deref())
                    .await
            }
        };
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success("policy", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("policy", error_class, message, exit_code)
        }
    }
}

type CommandFailure = (&'static str, String, u8);

async fn require_tenant(
    pool: &steward_db::DbPool,
    tenant: &str,
) -> Result<TenantId, CommandFailure> {
    let tenant_id = TenantId(tenant.to_string());
    let tenants = SqlTenantRepository::new(pool.clone());
    let found = tenants
        .find_by_id(&tenant_id)
        .await
        .map_err(|error| ("query", error.to_string(), 5u8))?;
    if found.is_none() {
        return Err(("unknown_tenant", format!("tenant `{tenant}` is not known"), 6));
    }
    Ok(tenant_id)
}

async fn get_policy(
    pool: &steward_db::DbPool,
    tenant: &str,
    action_type: Option<&str>,
) -> Result<String, CommandFailure> {
    let tenant_id = require_tenant(pool, tenant).await?;
    let policies = SqlPolicyRepository::new(pool.clone());

    match action_type {
        Some(action_type) => {
            let exact = policies
                .find(&tenant_id, action_type)
                .await
                .map_err(|error| ("query", error.to_string(), 5u8))?;
            let wildcard = policies
                .find(&tenant_id, WILDCARD_ACTION_TYPE)
                .await
                .map_err(|error| ("query", error.to_string(), 5u8))?;
            let resolved = resolve_policy(exact.as_ref(), wildcard.as_ref());

            let source = if exact.is_some() {
                "exact"
            } else if wildcard.is_some() {
                "wildcard"
            } else {
                "platform_default"
            };
            let payload = serde_json::json!({
                "tenant": tenant,
                "action_type": action_type,
                "source": source,
                "level": resolved.level.as_str(),
                "max_per_day": resolved.constraints.max_per_day,
                "required_role": resolved.required_role.map(|role| role.as_str()),
            });
            serde_json::to_string_pretty(&payload)
                .map_err(|error| ("serialization", error.to_string(), 7u8))
        }
        None => {
            let rows = policies
                .list_for_tenant(&tenant_id)
                .await
                .map_err(|error| ("query", error.to_string(), 5u8))?;
            let rows: Vec<PolicyRow> = rows.iter().map(PolicyRow::from).collect();
            serde_json::to_string_pretty(&rows)
                .map_err(|error| ("serialization", error.to_string(), 7u8))
        }
    }
}

async fn set_policy(
    pool: &steward_db::DbPool,
    tenant: &str,
    action_type: &str,
    level: &str,
    max_per_day: Option<u32>,
    required_role: Option<&str>,
) -> Result<String, CommandFailure> {
    let level = AutonomyLevel::parse(level).ok_or_else(|| {
        (
            "invalid_argument",
            format!("unknown autonomy level `{level}` (expected off|assisted|auto)"),
            6u8,
        )
    })?;
    let required_role = required_role
        .map(|value| {
            Role::parse(value).ok_or_else(|| {
                (
                    "invalid_argument",
                    format!("unknown role `{value}` (expected staff|manager|admin)"),
                    6u8,
                )
            })
        })
        .transpose()?;

    let tenant_id = require_tenant(pool, tenant).await?;
    let policies = SqlPolicyRepository::new(pool.clone());
    let history = SqlHistoryRepository::new(pool.clone());

    let now = Utc::now();
    let existing = policies
        .find(&tenant_id, action_type)
        .await
        .map_err(|error| ("query", error.to_string(), 5u8))?;
    let constraints = match max_per_day {
        Some(max) => PolicyConstraints::with_max_per_day(max),
        None => PolicyConstraints::default(),
    };
    let config = AutonomyConfig {
        tenant_id: tenant_id.clone(),
        action_type: action_type.to_string(),
        level,
        constraints,
        required_role,
        created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
        updated_at: now,
    };
    policies.upsert(config).await.map_err(|error| ("write", error.to_string(), 5u8))?;

    let entry = HistoryEntry::new(
        tenant_id.clone(),
        ActorRef::system().with_name("operator-cli"),
        GovernanceAction::PolicyUpdated,
        "autonomy_config",
        format!("{tenant_id}:{action_type}"),
        format!("Set {} policy to {}", action_type, level.as_str()),
        now,
    );
    history.append(&entry).await.map_err(|error| ("write", error.to_string(), 5u8))?;

    Ok(format!("set `{action_type}` policy for tenant `{tenant}` to {}", level.as_str()))
}
