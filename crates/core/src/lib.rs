pub mod config;
pub mod domain;
pub mod errors;
pub mod resolver;
pub mod window;

pub use domain::card::{check_transition, ActionCard, CardId, CardStatus};
pub use domain::feedback::{helpful_rate, AgentFeedback, FeedbackRating, FeedbackStats, TypeStats};
pub use domain::history::{
    ActorRef, ActorType, GovernanceAction, HistoryEntry, HistoryFilter, StatusDiff,
};
pub use domain::policy::{
    AutonomyConfig, AutonomyLevel, PolicyConstraints, ResolvedPolicy, WILDCARD_ACTION_TYPE,
};
pub use domain::tenant::{Role, Tenant, TenantId};
pub use errors::{DispatchError, DomainError, GovernanceError, InterfaceError};
pub use resolver::resolve_policy;
pub use window::{day_key, DayKey};

pub use chrono;
