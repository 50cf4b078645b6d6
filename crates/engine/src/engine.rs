use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use steward_core::{
    day_key, resolve_policy, ActionCard, ActorRef, ActorType, AgentFeedback, AutonomyConfig,
    AutonomyLevel, CardId, CardStatus, FeedbackRating, FeedbackStats, GovernanceAction,
    GovernanceError, HistoryEntry, HistoryFilter, PolicyConstraints, ResolvedPolicy, Role, Tenant,
    TenantId, WILDCARD_ACTION_TYPE,
};
use steward_db::repositories::{
    CardRepository, FeedbackRepository, HistoryRepository, PolicyRepository,
    RateCounterRepository, RepositoryError, TenantRepository,
};

use crate::directory::RoleDirectory;
use crate::dispatch::{Dispatcher, ExternalRef};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Age after which a still-pending card is eligible for the expiry sweep.
    pub pending_expiry: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { pending_expiry: Duration::hours(72) }
    }
}

/// A proposed action arriving from the automation layer.
#[derive(Clone, Debug)]
pub struct ProposalRequest {
    pub tenant_id: TenantId,
    pub action_type: String,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Policy level OFF: nothing was created, only the suppression was logged.
    Suppressed,
    /// A card now waits for a human.
    Pending { card_id: CardId },
    /// The AUTO path claimed the card and the dispatch succeeded.
    AutoExecuted { card_id: CardId, external_ref: ExternalRef },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Executed { external_ref: ExternalRef },
    /// The approval stuck but the dispatch leg failed; the card stays
    /// APPROVED and `retry_dispatch` may re-run it.
    DispatchFailed { error: steward_core::DispatchError },
}

/// Orchestrates the whole governance flow: policy resolution, card intake,
/// the human approve/dismiss actions, rate gating and dispatch. All state
/// lives behind the repository traits; the engine itself is stateless and
/// cheap to clone.
#[derive(Clone)]
pub struct GovernanceEngine {
    tenants: Arc<dyn TenantRepository>,
    policies: Arc<dyn PolicyRepository>,
    cards: Arc<dyn CardRepository>,
    rates: Arc<dyn RateCounterRepository>,
    history: Arc<dyn HistoryRepository>,
    feedback: Arc<dyn FeedbackRepository>,
    dispatcher: Arc<dyn Dispatcher>,
    directory: Arc<dyn RoleDirectory>,
    config: EngineConfig,
}

fn persistence(error: RepositoryError) -> GovernanceError {
    GovernanceError::Persistence(error.to_string())
}

impl GovernanceEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        policies: Arc<dyn PolicyRepository>,
        cards: Arc<dyn CardRepository>,
        rates: Arc<dyn RateCounterRepository>,
        history: Arc<dyn HistoryRepository>,
        feedback: Arc<dyn FeedbackRepository>,
        dispatcher: Arc<dyn Dispatcher>,
        directory: Arc<dyn RoleDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tenants,
            policies,
            cards,
            rates,
            history,
            feedback,
            dispatcher,
            directory,
            config,
        }
    }

    async fn require_tenant(&self, tenant_id: &TenantId) -> Result<Tenant, GovernanceError> {
        self.tenants
            .find_by_id(tenant_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| GovernanceError::TenantNotFound(tenant_id.0.clone()))
    }

    async fn require_card(&self, card_id: &CardId) -> Result<ActionCard, GovernanceError> {
        self.cards
            .find_by_id(card_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| GovernanceError::CardNotFound(card_id.0.clone()))
    }

    /// Staff actors are checked against the directory; the automation layer
    /// and system sweeps act under the engine's own authority.
    async fn check_role(
        &self,
        actor: &ActorRef,
        required: Option<Role>,
    ) -> Result<(), GovernanceError> {
        if actor.actor_type != ActorType::Staff {
            return Ok(());
        }
        let required = required.unwrap_or(Role::Staff);
        let actor_id = actor.actor_id.clone().unwrap_or_default();
        let granted = self.directory.role_of(&actor_id).await?;
        match granted {
            Some(role) if role.satisfies(required) => Ok(()),
            _ => Err(GovernanceError::Forbidden { actor_id, required }),
        }
    }

    /// Effective policy for one action type: exact row, else the tenant
    /// wildcard, else the platform default.
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
    ) -> Result<ResolvedPolicy, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        let exact =
            self.policies.find(tenant_id, action_type).await.map_err(persistence)?;
        let wildcard =
            self.policies.find(tenant_id, WILDCARD_ACTION_TYPE).await.map_err(persistence)?;
        Ok(resolve_policy(exact.as_ref(), wildcard.as_ref()))
    }

    pub async fn propose(
        &self,
        request: ProposalRequest,
        now: DateTime<Utc>,
    ) -> Result<ProposalOutcome, GovernanceError> {
        let tenant = self.require_tenant(&request.tenant_id).await?;
        let policy = self.resolve(&request.tenant_id, &request.action_type).await?;

        match policy.level {
            AutonomyLevel::Off => self.suppress(&request, now).await,
            AutonomyLevel::Assisted => {
                let card = self.create_pending(&request, now, &[]).await?;
                Ok(ProposalOutcome::Pending { card_id: card.id })
            }
            AutonomyLevel::Auto => self.propose_auto(&request, &tenant, &policy, now).await,
        }
    }

    async fn suppress(
        &self,
        request: &ProposalRequest,
        now: DateTime<Utc>,
    ) -> Result<ProposalOutcome, GovernanceError> {
        // No card exists, so the ledger row gets its own proposal id.
        let entry = HistoryEntry::new(
            request.tenant_id.clone(),
            ActorRef::system(),
            GovernanceAction::CardSuppressed,
            "proposal",
            format!("proposal-{}", Uuid::new_v4()),
            format!("Suppressed {} proposal: {}", request.action_type, request.title),
            now,
        );
        self.history.append(&entry).await.map_err(persistence)?;
        tracing::info!(
            tenant_id = %request.tenant_id,
            action_type = %request.action_type,
            "proposal suppressed by OFF policy"
        );
        Ok(ProposalOutcome::Suppressed)
    }

    /// Creates the PENDING card and its `card.created` entry, plus any extra
    /// entries, in one transaction.
    async fn create_pending(
        &self,
        request: &ProposalRequest,
        now: DateTime<Utc>,
        extra_entries: &[HistoryEntry],
    ) -> Result<ActionCard, GovernanceError> {
        let card = ActionCard::new_pending(
            request.tenant_id.clone(),
            request.action_type.clone(),
            request.title.clone(),
            request.description.clone(),
            request.suggested_action.clone(),
            request.payload.clone(),
            now,
        );
        let mut entries = vec![HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardCreated,
            "action_card",
            &card.id.0,
            format!("Proposed {}: {}", card.action_type, card.title),
            now,
        )];
        entries.extend_from_slice(extra_entries);

        self.cards.insert(&card, &entries).await.map_err(persistence)?;
        Ok(card)
    }

    async fn propose_auto(
        &self,
        request: &ProposalRequest,
        tenant: &Tenant,
        policy: &ResolvedPolicy,
        now: DateTime<Utc>,
    ) -> Result<ProposalOutcome, GovernanceError> {
        let day = day_key(now, tenant.utc_offset_minutes);

        let reserved = match policy.constraints.max_per_day {
            Some(max) => {
                let reserved = self
                    .rates
                    .try_reserve(&request.tenant_id, &request.action_type, &day, max)
                    .await
                    .map_err(persistence)?;
                if !reserved {
                    // Ceiling hit: the proposal degrades to a normal pending
                    // card instead of being dropped.
                    let rate_entry = |card_id: &str| {
                        HistoryEntry::new(
                            request.tenant_id.clone(),
                            ActorRef::system(),
                            GovernanceAction::CardRateLimited,
                            "action_card",
                            card_id,
                            format!(
                                "Daily limit of {max} reached for {}; queued for review",
                                request.action_type
                            ),
                            now,
                        )
                    };
                    let card = ActionCard::new_pending(
                        request.tenant_id.clone(),
                        request.action_type.clone(),
                        request.title.clone(),
                        request.description.clone(),
                        request.suggested_action.clone(),
                        request.payload.clone(),
                        now,
                    );
                    let entries = vec![
                        HistoryEntry::new(
                            card.tenant_id.clone(),
                            ActorRef::ai(),
                            GovernanceAction::CardCreated,
                            "action_card",
                            &card.id.0,
                            format!("Proposed {}: {}", card.action_type, card.title),
                            now,
                        ),
                        rate_entry(&card.id.0),
                    ];
                    self.cards.insert(&card, &entries).await.map_err(persistence)?;
                    tracing::info!(card_id = %card.id, "auto proposal degraded by rate ceiling");
                    return Ok(ProposalOutcome::Pending { card_id: card.id });
                }
                true
            }
            None => false,
        };

        let card = self.create_pending(request, now, &[]).await?;

        // Claim before dispatch: only the holder of the PENDING->EXECUTED
        // edge may call the dispatcher.
        let claim_entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::ai(),
            GovernanceAction::CardAutoExecuted,
            "action_card",
            &card.id.0,
            format!("Auto-executed {} under AUTO policy", card.action_type),
            now,
        )
        .with_diff(Some(CardStatus::Pending), CardStatus::Executed);
        let claimed = self
            .cards
            .transition(
                &card.id,
                CardStatus::Pending,
                CardStatus::Executed,
                Some(&ActorRef::ai()),
                Some(now),
                &claim_entry,
            )
            .await
            .map_err(persistence)?;
        if !claimed {
            // Someone resolved the card between insert and claim. Their
            // transition owns the dispatch decision now.
            if reserved {
                self.rates
                    .release(&request.tenant_id, &request.action_type, &day)
                    .await
                    .map_err(persistence)?;
            }
            return Ok(ProposalOutcome::Pending { card_id: card.id });
        }

        match self.dispatcher.dispatch(&card.action_type, &card.id, &card.payload).await {
            Ok(external_ref) => {
                self.cards
                    .record_external_ref(&card.id, &external_ref.0)
                    .await
                    .map_err(persistence)?;
                if !reserved {
                    self.rates
                        .record(&request.tenant_id, &request.action_type, &day)
                        .await
                        .map_err(persistence)?;
                }
                tracing::info!(card_id = %card.id, external_ref = %external_ref, "auto dispatch succeeded");
                Ok(ProposalOutcome::AutoExecuted { card_id: card.id, external_ref })
            }
            Err(error) => {
                tracing::warn!(card_id = %card.id, %error, "auto dispatch failed, downgrading card");
                let revert_entry = HistoryEntry::new(
                    card.tenant_id.clone(),
                    ActorRef::system(),
                    GovernanceAction::CardAutoExecutionFailed,
                    "action_card",
                    &card.id.0,
                    format!("Auto dispatch failed ({error}); card returned for review"),
                    now,
                )
                .with_diff(Some(CardStatus::Executed), CardStatus::Pending);
                self.cards
                    .transition(&card.id, CardStatus::Executed, CardStatus::Pending, None, None, &revert_entry)
                    .await
                    .map_err(persistence)?;
                if reserved {
                    self.rates
                        .release(&request.tenant_id, &request.action_type, &day)
                        .await
                        .map_err(persistence)?;
                }
                Ok(ProposalOutcome::Pending { card_id: card.id })
            }
        }
    }

    pub async fn approve(
        &self,
        card_id: &CardId,
        actor: &ActorRef,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, GovernanceError> {
        let card = self.require_card(card_id).await?;
        let tenant = self.require_tenant(&card.tenant_id).await?;
        let policy = self.resolve(&card.tenant_id, &card.action_type).await?;
        self.check_role(actor, policy.required_role).await?;

        if card.status != CardStatus::Pending {
            return Err(GovernanceError::AlreadyResolved {
                card_id: card_id.0.clone(),
                status: card.status,
            });
        }

        let entry = HistoryEntry::new(
            card.tenant_id.clone(),
            actor.clone(),
            GovernanceAction::CardApproved,
            "action_card",
            &card.id.0,
            format!("Approved {}: {}", card.action_type, card.title),
            now,
        )
        .with_diff(Some(CardStatus::Pending), CardStatus::Approved);
        let won = self
            .cards
            .transition(
                card_id,
                CardStatus::Pending,
                CardStatus::Approved,
                Some(actor),
                Some(now),
                &entry,
            )
            .await
            .map_err(persistence)?;
        if !won {
            let current = self.require_card(card_id).await?;
            return Err(GovernanceError::AlreadyResolved {
                card_id: card_id.0.clone(),
                status: current.status,
            });
        }

        self.dispatch_approved(&card, &tenant, actor, now).await
    }

    /// Re-runs the dispatch leg of an approved card whose earlier dispatch
    /// failed.
    pub async fn retry_dispatch(
        &self,
        card_id: &CardId,
        actor: &ActorRef,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, GovernanceError> {
        let card = self.require_card(card_id).await?;
        let tenant = self.require_tenant(&card.tenant_id).await?;
        let policy = self.resolve(&card.tenant_id, &card.action_type).await?;
        self.check_role(actor, policy.required_role).await?;

        if card.status != CardStatus::Approved {
            return Err(GovernanceError::AlreadyResolved {
                card_id: card_id.0.clone(),
                status: card.status,
            });
        }

        self.dispatch_approved(&card, &tenant, actor, now).await
    }

    async fn dispatch_approved(
        &self,
        card: &ActionCard,
        tenant: &Tenant,
        actor: &ActorRef,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, GovernanceError> {
        match self.dispatcher.dispatch(&card.action_type, &card.id, &card.payload).await {
            Ok(external_ref) => {
                let entry = HistoryEntry::new(
                    card.tenant_id.clone(),
                    actor.clone(),
                    GovernanceAction::CardExecuted,
                    "action_card",
                    &card.id.0,
                    format!("Executed {} via {}", card.action_type, external_ref),
                    now,
                )
                .with_diff(Some(CardStatus::Approved), CardStatus::Executed);
                let won = self
                    .cards
                    .transition(
                        &card.id,
                        CardStatus::Approved,
                        CardStatus::Executed,
                        Some(actor),
                        Some(now),
                        &entry,
                    )
                    .await
                    .map_err(persistence)?;
                if !won {
                    let current = self.require_card(&card.id).await?;
                    return Err(GovernanceError::AlreadyResolved {
                        card_id: card.id.0.clone(),
                        status: current.status,
                    });
                }
                self.cards
                    .record_external_ref(&card.id, &external_ref.0)
                    .await
                    .map_err(persistence)?;
                let day = day_key(now, tenant.utc_offset_minutes);
                self.rates
                    .record(&card.tenant_id, &card.action_type, &day)
                    .await
                    .map_err(persistence)?;
                tracing::info!(card_id = %card.id, external_ref = %external_ref, "dispatch succeeded");
                Ok(ApprovalOutcome::Executed { external_ref })
            }
            Err(error) => {
                tracing::warn!(card_id = %card.id, %error, "dispatch failed, card stays approved");
                let entry = HistoryEntry::new(
                    card.tenant_id.clone(),
                    ActorRef::system(),
                    GovernanceAction::CardDispatchFailed,
                    "action_card",
                    &card.id.0,
                    format!("Dispatch of {} failed: {error}", card.action_type),
                    now,
                );
                self.history.append(&entry).await.map_err(persistence)?;
                Ok(ApprovalOutcome::DispatchFailed { error })
            }
        }
    }

    pub async fn dismiss(
        &self,
        card_id: &CardId,
        actor: &ActorRef,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let card = self.require_card(card_id).await?;
        // Dismissal needs a known actor, not the approval role gate.
        self.check_role(actor, None).await?;

        let entry = HistoryEntry::new(
            card.tenant_id.clone(),
            actor.clone(),
            GovernanceAction::CardDismissed,
            "action_card",
            &card.id.0,
            format!("Dismissed {}: {}", card.action_type, card.title),
            now,
        )
        .with_diff(Some(CardStatus::Pending), CardStatus::Dismissed);
        let won = self
            .cards
            .transition(
                card_id,
                CardStatus::Pending,
                CardStatus::Dismissed,
                Some(actor),
                Some(now),
                &entry,
            )
            .await
            .map_err(persistence)?;
        if !won {
            let current = self.require_card(card_id).await?;
            return Err(GovernanceError::AlreadyResolved {
                card_id: card_id.0.clone(),
                status: current.status,
            });
        }
        Ok(())
    }

    pub async fn expire(
        &self,
        card_id: &CardId,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let card = self.require_card(card_id).await?;
        if card.created_at > now - self.config.pending_expiry {
            return Err(GovernanceError::NotYetStale { card_id: card_id.0.clone() });
        }
        let entry = HistoryEntry::new(
            card.tenant_id.clone(),
            ActorRef::system(),
            GovernanceAction::CardExpired,
            "action_card",
            &card.id.0,
            format!("Expired {} after waiting for review", card.action_type),
            now,
        )
        .with_diff(Some(CardStatus::Pending), CardStatus::Expired);
        let won = self
            .cards
            .transition(
                card_id,
                CardStatus::Pending,
                CardStatus::Expired,
                Some(&ActorRef::system()),
                Some(now),
                &entry,
            )
            .await
            .map_err(persistence)?;
        if !won {
            let current = self.require_card(card_id).await?;
            return Err(GovernanceError::AlreadyResolved {
                card_id: card_id.0.clone(),
                status: current.status,
            });
        }
        Ok(())
    }

    /// Sweeps every pending card older than the configured window. Returns
    /// how many cards this call expired; racing resolutions simply reduce
    /// the count.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, GovernanceError> {
        let cutoff = now - self.config.pending_expiry;
        let stale = self.cards.list_pending_created_before(cutoff).await.map_err(persistence)?;

        let mut expired = 0;
        for card in stale {
            match self.expire(&card.id, now).await {
                Ok(()) => expired += 1,
                Err(GovernanceError::AlreadyResolved { .. }) => {}
                Err(error) => return Err(error),
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired stale pending cards");
        }
        Ok(expired)
    }

    pub async fn get(&self, card_id: &CardId) -> Result<ActionCard, GovernanceError> {
        self.require_card(card_id).await
    }

    pub async fn list_pending(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ActionCard>, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        self.cards.list_pending(tenant_id).await.map_err(persistence)
    }

    pub async fn list_history(
        &self,
        tenant_id: &TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        self.history.list(tenant_id, filter).await.map_err(persistence)
    }

    pub async fn get_policy(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AutonomyConfig>, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        self.policies.list_for_tenant(tenant_id).await.map_err(persistence)
    }

    /// Upserts a policy row and logs the change. Policy edits always require
    /// the admin role.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_policy(
        &self,
        tenant_id: &TenantId,
        action_type: &str,
        level: AutonomyLevel,
        constraints: PolicyConstraints,
        required_role: Option<Role>,
        actor: &ActorRef,
        now: DateTime<Utc>,
    ) -> Result<AutonomyConfig, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        self.check_role(actor, Some(Role::Admin)).await?;

        let existing =
            self.policies.find(tenant_id, action_type).await.map_err(persistence)?;
        let config = AutonomyConfig {
            tenant_id: tenant_id.clone(),
            action_type: action_type.to_string(),
            level,
            constraints,
            required_role,
            created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.policies.upsert(config.clone()).await.map_err(persistence)?;

        let entry = HistoryEntry::new(
            tenant_id.clone(),
            actor.clone(),
            GovernanceAction::PolicyUpdated,
            "autonomy_config",
            format!("{tenant_id}:{action_type}"),
            format!("Set {} policy to {}", action_type, level.as_str()),
            now,
        );
        self.history.append(&entry).await.map_err(persistence)?;
        Ok(config)
    }

    /// Records feedback on a card. The first rating is sticky; repeats only
    /// refresh the comment.
    pub async fn rate(
        &self,
        card_id: &CardId,
        rating: FeedbackRating,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AgentFeedback, GovernanceError> {
        let card = self.require_card(card_id).await?;
        let feedback = AgentFeedback {
            card_id: card.id.clone(),
            tenant_id: card.tenant_id.clone(),
            action_type: card.action_type.clone(),
            rating,
            comment,
            created_at: now,
            updated_at: now,
        };
        self.feedback.rate(feedback).await.map_err(persistence)
    }

    pub async fn stats(
        &self,
        tenant_id: &TenantId,
        type_filter: Option<&str>,
    ) -> Result<FeedbackStats, GovernanceError> {
        self.require_tenant(tenant_id).await?;
        self.feedback.stats(tenant_id, type_filter).await.map_err(persistence)
    }
}
