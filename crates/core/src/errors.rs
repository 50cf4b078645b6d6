use thiserror::Error;

use crate::domain::card::CardStatus;
use crate::domain::tenant::Role;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid card transition from {from:?} to {to:?}")]
    InvalidCardTransition { from: CardStatus, to: CardStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Outcome reported by the downstream execution collaborator. The engine
/// never retries these itself; it degrades or records and lets a human drive.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("downstream rejected the action: {0}")]
    Rejected(String),
    #[error("downstream transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    #[error("action card not found: {0}")]
    CardNotFound(String),
    #[error("card {card_id} was already resolved to {status:?}")]
    AlreadyResolved { card_id: String, status: CardStatus },
    #[error("actor `{actor_id}` does not meet required role {required:?}")]
    Forbidden { actor_id: String, required: Role },
    #[error("card {card_id} has not yet aged past the pending review window")]
    NotYetStale { card_id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested item could not be found.",
            Self::Conflict { .. } => {
                "This item was already handled by someone else. Refresh to see its latest state."
            }
            Self::Forbidden { .. } => {
                "You do not have the required role to perform this action."
            }
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl GovernanceError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<GovernanceError> for InterfaceError {
    fn from(value: GovernanceError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            GovernanceError::TenantNotFound(id) => Self::NotFound {
                message: format!("tenant `{id}` is not known"),
                correlation_id: unassigned,
            },
            GovernanceError::CardNotFound(id) => Self::NotFound {
                message: format!("action card `{id}` is not known"),
                correlation_id: unassigned,
            },
            GovernanceError::AlreadyResolved { card_id, status } => Self::Conflict {
                message: format!("card `{card_id}` already resolved to {}", status.as_str()),
                correlation_id: unassigned,
            },
            GovernanceError::Forbidden { actor_id, required } => Self::Forbidden {
                message: format!(
                    "actor `{actor_id}` lacks required role `{}`",
                    required.as_str()
                ),
                correlation_id: unassigned,
            },
            GovernanceError::NotYetStale { card_id } => Self::BadRequest {
                message: format!("card `{card_id}` is still inside its review window"),
                correlation_id: unassigned,
            },
            GovernanceError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned }
            }
            GovernanceError::Dispatch(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: unassigned,
            },
            GovernanceError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            GovernanceError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}
