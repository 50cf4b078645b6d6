pub mod directory;
pub mod dispatch;
pub mod engine;

pub use directory::{RoleDirectory, StaticRoleDirectory};
pub use dispatch::{Dispatcher, ExternalRef, RecordingDispatcher};
pub use engine::{
    ApprovalOutcome, EngineConfig, GovernanceEngine, ProposalOutcome, ProposalRequest,
};
