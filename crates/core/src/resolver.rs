use crate::domain::policy::{AutonomyConfig, ResolvedPolicy};

/// Two-level policy lookup: the exact (tenant, action type) row wins, the
/// tenant wildcard row is the fallback, and the platform default covers
/// tenants with no configuration at all. A missing specific row is the
/// normal path, never an error.
pub fn resolve_policy(
    exact: Option<&AutonomyConfig>,
    wildcard: Option<&AutonomyConfig>,
) -> ResolvedPolicy {
    match exact.or(wildcard) {
        Some(config) => ResolvedPolicy {
            level: config.level,
            constraints: config.constraints.clone(),
            required_role: config.required_role,
        },
        None => ResolvedPolicy::platform_default(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::resolve_policy;
    use crate::domain::policy::{
        AutonomyConfig, AutonomyLevel, PolicyConstraints, WILDCARD_ACTION_TYPE,
    };
    use crate::domain::tenant::{Role, TenantId};

    fn config(action_type: &str, level: AutonomyLevel) -> AutonomyConfig {
        let now = Utc::now();
        AutonomyConfig {
            tenant_id: TenantId("t-1".to_owned()),
            action_type: action_type.to_owned(),
            level,
            constraints: PolicyConstraints::with_max_per_day(5),
            required_role: Some(Role::Manager),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn exact_row_shadows_wildcard() {
        let exact = config("deposit_reminder", AutonomyLevel::Auto);
        let wildcard = config(WILDCARD_ACTION_TYPE, AutonomyLevel::Off);

        let resolved = resolve_policy(Some(&exact), Some(&wildcard));
        assert_eq!(resolved.level, AutonomyLevel::Auto);
        assert_eq!(resolved.constraints.max_per_day, Some(5));
        assert_eq!(resolved.required_role, Some(Role::Manager));
    }

    #[test]
    fn wildcard_applies_when_no_specific_row_exists() {
        let wildcard = config(WILDCARD_ACTION_TYPE, AutonomyLevel::Off);

        let resolved = resolve_policy(None, Some(&wildcard));
        assert_eq!(resolved.level, AutonomyLevel::Off);
    }

    #[test]
    fn platform_default_is_assisted() {
        let resolved = resolve_policy(None, None);
        assert_eq!(resolved.level, AutonomyLevel::Assisted);
        assert_eq!(resolved.constraints.max_per_day, None);
        assert_eq!(resolved.required_role, None);
    }
}
