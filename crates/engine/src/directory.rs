use std::collections::HashMap;

use async_trait::async_trait;

use steward_core::{GovernanceError, Role};

/// Lookup from an actor id to their granted role. `None` means the actor is
/// unknown, which every role gate treats as a failure.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn role_of(&self, actor_id: &str) -> Result<Option<Role>, GovernanceError>;
}

/// Fixed role table, enough for the CLI and for tests.
#[derive(Default)]
pub struct StaticRoleDirectory {
    roles: HashMap<String, Role>,
}

impl StaticRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, actor_id: impl Into<String>, role: Role) -> Self {
        self.roles.insert(actor_id.into(), role);
        self
    }
}

#[async_trait]
impl RoleDirectory for StaticRoleDirectory {
    async fn role_of(&self, actor_id: &str) -> Result<Option<Role>, GovernanceError> {
        Ok(self.roles.get(actor_id).copied())
    }
}
