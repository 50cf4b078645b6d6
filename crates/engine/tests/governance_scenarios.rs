//! End-to-end governance flows over a real SQLite store: policy fallback,
//! racing human resolutions, rate ceilings, audit completeness, feedback.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use steward_core::{
    ActorRef, AutonomyConfig, AutonomyLevel, CardId, CardStatus, DispatchError, FeedbackRating,
    GovernanceAction, GovernanceError, HistoryFilter, PolicyConstraints, Role, Tenant, TenantId,
};
use steward_db::repositories::{
    PolicyRepository, SqlCardRepository, SqlFeedbackRepository, SqlHistoryRepository,
    SqlPolicyRepository, SqlRateCounterRepository, SqlTenantRepository, TenantRepository,
};
use steward_db::{connect_with_settings, migrations};
use steward_engine::{
    ApprovalOutcome, EngineConfig, GovernanceEngine, ProposalOutcome, ProposalRequest,
    RecordingDispatcher, StaticRoleDirectory,
};

const TENANT: &str = "t-1";

struct Harness {
    engine: GovernanceEngine,
    dispatcher: Arc<RecordingDispatcher>,
    policies: Arc<SqlPolicyRepository>,
}

async fn harness() -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let tenants = Arc::new(SqlTenantRepository::new(pool.clone()));
    tenants
        .save(Tenant {
            id: TenantId(TENANT.to_string()),
            name: "Demo Venue".to_string(),
            utc_offset_minutes: 0,
            created_at: Utc::now(),
        })
        .await
        .expect("save tenant");

    let policies = Arc::new(SqlPolicyRepository::new(pool.clone()));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let directory = Arc::new(
        StaticRoleDirectory::new()
            .with_role("staff-1", Role::Staff)
            .with_role("staff-2", Role::Staff)
            .with_role("manager-1", Role::Manager)
            .with_role("admin-1", Role::Admin),
    );

    let engine = GovernanceEngine::new(
        tenants,
        Arc::clone(&policies) as Arc<dyn PolicyRepository>,
        Arc::new(SqlCardRepository::new(pool.clone())),
        Arc::new(SqlRateCounterRepository::new(pool.clone())),
        Arc::new(SqlHistoryRepository::new(pool.clone())),
        Arc::new(SqlFeedbackRepository::new(pool)),
        Arc::clone(&dispatcher) as Arc<dyn steward_engine::Dispatcher>,
        directory,
        EngineConfig { pending_expiry: Duration::hours(72) },
    );
    Harness { engine, dispatcher, policies }
}

fn tenant() -> TenantId {
    TenantId(TENANT.to_string())
}

fn request(action_type: &str) -> ProposalRequest {
    ProposalRequest {
        tenant_id: tenant(),
        action_type: action_type.to_string(),
        title: "Send deposit reminder".to_string(),
        description: "Deposit for booking b-42 is 48 hours overdue.".to_string(),
        suggested_action: Some("Send the standard reminder message.".to_string()),
        payload: serde_json::json!({"booking_id": "b-42"}),
    }
}

async fn set_policy(
    policies: &SqlPolicyRepository,
    action_type: &str,
    level: AutonomyLevel,
    constraints: PolicyConstraints,
    required_role: Option<Role>,
) {
    let now = Utc::now();
    policies
        .upsert(AutonomyConfig {
            tenant_id: tenant(),
            action_type: action_type.to_string(),
            level,
            constraints,
            required_role,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("upsert policy");
}

async fn pending_card(harness: &Harness, action_type: &str) -> CardId {
    match harness.engine.propose(request(action_type), Utc::now()).await.expect("propose") {
        ProposalOutcome::Pending { card_id } => card_id,
        other => panic!("expected pending card, got {other:?}"),
    }
}

async fn audit_actions(harness: &Harness, card_id: &CardId) -> Vec<GovernanceAction> {
    harness
        .engine
        .list_history(&tenant(), &HistoryFilter::for_entity(&card_id.0))
        .await
        .expect("list history")
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

// P1: specific row beats wildcard beats platform default.
#[tokio::test]
async fn policy_fallback_prefers_the_most_specific_row() {
    let h = harness().await;

    let resolved = h.engine.resolve(&tenant(), "deposit_reminder").await.expect("resolve");
    assert_eq!(resolved.level, AutonomyLevel::Assisted, "platform default");

    set_policy(&h.policies, "*", AutonomyLevel::Off, PolicyConstraints::default(), None).await;
    let resolved = h.engine.resolve(&tenant(), "deposit_reminder").await.expect("resolve");
    assert_eq!(resolved.level, AutonomyLevel::Off, "wildcard fallback");

    set_policy(
        &h.policies,
        "deposit_reminder",
        AutonomyLevel::Auto,
        PolicyConstraints::with_max_per_day(3),
        Some(Role::Manager),
    )
    .await;
    let resolved = h.engine.resolve(&tenant(), "deposit_reminder").await.expect("resolve");
    assert_eq!(resolved.level, AutonomyLevel::Auto, "exact row wins");
    assert_eq!(resolved.constraints.max_per_day, Some(3));
    assert_eq!(resolved.required_role, Some(Role::Manager));

    let missing = h.engine.resolve(&TenantId("ghost".to_string()), "anything").await;
    assert!(matches!(missing, Err(GovernanceError::TenantNotFound(_))));
}

// P2: N racing resolutions of one pending card produce exactly one winner
// and at most one dispatch.
#[tokio::test]
async fn concurrent_resolutions_have_exactly_one_winner() {
    let h = harness().await;
    let card_id = pending_card(&h, "deposit_reminder").await;

    let mut tasks = Vec::new();
    for i in 0..6 {
        let engine = h.engine.clone();
        let card_id = card_id.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine
                    .approve(&card_id, &ActorRef::staff("staff-1"), Utc::now())
                    .await
                    .map(|_| ())
            } else {
                engine.dismiss(&card_id, &ActorRef::staff("staff-2"), Utc::now()).await
            }
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(()) => winners += 1,
            Err(GovernanceError::AlreadyResolved { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1, "exactly one resolution may win");
    assert!(
        h.dispatcher.calls_for(&card_id) <= 1,
        "the dispatcher must never run twice for one card"
    );

    let card = h.engine.get(&card_id).await.expect("get");
    assert!(matches!(card.status, CardStatus::Executed | CardStatus::Dismissed));
}

// P3: the AUTO ceiling admits exactly max_per_day dispatches; the overflow
// degrades to pending review instead of being dropped.
#[tokio::test]
async fn auto_ceiling_degrades_overflow_to_pending() {
    let h = harness().await;
    set_policy(
        &h.policies,
        "deposit_reminder",
        AutonomyLevel::Auto,
        PolicyConstraints::with_max_per_day(2),
        None,
    )
    .await;

    let mut auto_executed = 0;
    let mut degraded = Vec::new();
    for _ in 0..3 {
        match h.engine.propose(request("deposit_reminder"), Utc::now()).await.expect("propose") {
            ProposalOutcome::AutoExecuted { .. } => auto_executed += 1,
            ProposalOutcome::Pending { card_id } => degraded.push(card_id),
            ProposalOutcome::Suppressed => panic!("nothing should be suppressed"),
        }
    }

    assert_eq!(auto_executed, 2);
    assert_eq!(degraded.len(), 1);
    assert_eq!(h.dispatcher.total_calls(), 2);

    let actions = audit_actions(&h, &degraded[0]).await;
    assert!(actions.contains(&GovernanceAction::CardRateLimited));
    assert!(actions.contains(&GovernanceAction::CardCreated));
}

// P4: every terminal state leaves a ledger entry naming the card.
#[tokio::test]
async fn every_terminal_state_is_audited() {
    let h = harness().await;

    let executed = pending_card(&h, "deposit_reminder").await;
    h.engine.approve(&executed, &ActorRef::staff("staff-1"), Utc::now()).await.expect("approve");
    let actions = audit_actions(&h, &executed).await;
    assert!(actions.contains(&GovernanceAction::CardApproved));
    assert!(actions.contains(&GovernanceAction::CardExecuted));

    let dismissed = pending_card(&h, "deposit_reminder").await;
    h.engine.dismiss(&dismissed, &ActorRef::staff("staff-1"), Utc::now()).await.expect("dismiss");
    assert!(audit_actions(&h, &dismissed).await.contains(&GovernanceAction::CardDismissed));

    let expired = pending_card(&h, "deposit_reminder").await;
    h.engine.expire(&expired, Utc::now() + Duration::hours(73)).await.expect("expire");
    assert!(audit_actions(&h, &expired).await.contains(&GovernanceAction::CardExpired));
}

// Dismissal only needs a known actor; the approval role gate does not apply.
#[tokio::test]
async fn staff_can_dismiss_under_an_admin_approval_gate() {
    let h = harness().await;
    set_policy(
        &h.policies,
        "refund_deposit",
        AutonomyLevel::Assisted,
        PolicyConstraints::default(),
        Some(Role::Admin),
    )
    .await;
    let card_id = pending_card(&h, "refund_deposit").await;

    h.engine
        .dismiss(&card_id, &ActorRef::staff("staff-1"), Utc::now())
        .await
        .expect("staff dismisses despite the admin approval gate");

    let card = h.engine.get(&card_id).await.expect("get card");
    assert_eq!(card.status, CardStatus::Dismissed);
    assert_eq!(h.dispatcher.total_calls(), 0);
    assert!(audit_actions(&h, &card_id).await.contains(&GovernanceAction::CardDismissed));
}

// A card inside its review window cannot be expired, even by id.
#[tokio::test]
async fn fresh_pending_card_refuses_to_expire() {
    let h = harness().await;
    let card_id = pending_card(&h, "deposit_reminder").await;

    let refused = h.engine.expire(&card_id, Utc::now()).await;
    assert!(matches!(refused, Err(GovernanceError::NotYetStale { .. })));

    let card = h.engine.get(&card_id).await.expect("get card");
    assert_eq!(card.status, CardStatus::Pending);
    assert!(!audit_actions(&h, &card_id).await.contains(&GovernanceAction::CardExpired));
}

// P5: one rating per card; the first rating is sticky.
#[tokio::test]
async fn feedback_counts_once_per_card() {
    let h = harness().await;
    let card_id = pending_card(&h, "deposit_reminder").await;

    h.engine
        .rate(&card_id, FeedbackRating::Helpful, Some("good".to_string()), Utc::now())
        .await
        .expect("first rating");
    let stored = h
        .engine
        .rate(&card_id, FeedbackRating::NotHelpful, Some("reconsidered".to_string()), Utc::now())
        .await
        .expect("second rating");

    assert_eq!(stored.rating, FeedbackRating::Helpful);
    assert_eq!(stored.comment.as_deref(), Some("reconsidered"));

    let stats = h.engine.stats(&tenant(), None).await.expect("stats");
    assert_eq!(stats.total, 1);
    assert_eq!(stats.helpful, 1);
    assert_eq!(stats.helpful_rate, 100);
}

// Scenario A: an OFF policy suppresses the proposal entirely; only the
// ledger records it.
#[tokio::test]
async fn off_policy_suppresses_without_a_card() {
    let h = harness().await;
    set_policy(&h.policies, "deposit_reminder", AutonomyLevel::Off, PolicyConstraints::default(), None)
        .await;

    let outcome = h.engine.propose(request("deposit_reminder"), Utc::now()).await.expect("propose");
    assert_eq!(outcome, ProposalOutcome::Suppressed);

    assert!(h.engine.list_pending(&tenant()).await.expect("pending").is_empty());
    let suppressions = h
        .engine
        .list_history(
            &tenant(),
            &HistoryFilter {
                action: Some(GovernanceAction::CardSuppressed),
                ..HistoryFilter::default()
            },
        )
        .await
        .expect("history");
    assert_eq!(suppressions.len(), 1);
    assert_eq!(suppressions[0].entity_type, "proposal");
}

// Scenario B: AUTO with max_per_day = 1 dispatches once, then queues.
#[tokio::test]
async fn auto_single_slot_dispatches_then_queues() {
    let h = harness().await;
    set_policy(
        &h.policies,
        "waitlist_offer",
        AutonomyLevel::Auto,
        PolicyConstraints::with_max_per_day(1),
        None,
    )
    .await;

    let first = h.engine.propose(request("waitlist_offer"), Utc::now()).await.expect("first");
    let ProposalOutcome::AutoExecuted { card_id, external_ref } = first else {
        panic!("expected auto execution, got {first:?}");
    };
    let card = h.engine.get(&card_id).await.expect("get");
    assert_eq!(card.status, CardStatus::Executed);
    assert_eq!(card.external_ref.as_deref(), Some(external_ref.0.as_str()));
    assert!(audit_actions(&h, &card_id).await.contains(&GovernanceAction::CardAutoExecuted));

    let second = h.engine.propose(request("waitlist_offer"), Utc::now()).await.expect("second");
    assert!(matches!(second, ProposalOutcome::Pending { .. }));
    assert_eq!(h.dispatcher.total_calls(), 1);
}

// Scenario C: a required role gates approval; an admin passes where staff
// fails.
#[tokio::test]
async fn required_role_gates_approval() {
    let h = harness().await;
    set_policy(
        &h.policies,
        "refund_deposit",
        AutonomyLevel::Assisted,
        PolicyConstraints::default(),
        Some(Role::Admin),
    )
    .await;
    let card_id = pending_card(&h, "refund_deposit").await;

    let denied = h.engine.approve(&card_id, &ActorRef::staff("staff-1"), Utc::now()).await;
    assert!(matches!(
        denied,
        Err(GovernanceError::Forbidden { required: Role::Admin, .. })
    ));
    assert_eq!(h.dispatcher.total_calls(), 0, "a forbidden approval must not dispatch");

    h.engine
        .approve(&card_id, &ActorRef::staff("admin-1"), Utc::now())
        .await
        .expect("admin approval");
    assert_eq!(h.engine.get(&card_id).await.expect("get").status, CardStatus::Executed);
}

// Scenario D: the expiry sweep beats a late approval.
#[tokio::test]
async fn late_approval_after_expiry_sweep_fails() {
    let h = harness().await;

    let stale_created = Utc::now() - Duration::hours(100);
    let outcome = h
        .engine
        .propose(request("deposit_reminder"), stale_created)
        .await
        .expect("propose");
    let ProposalOutcome::Pending { card_id } = outcome else {
        panic!("expected pending card");
    };

    let expired = h.engine.expire_stale(Utc::now()).await.expect("sweep");
    assert_eq!(expired, 1);

    let late = h.engine.approve(&card_id, &ActorRef::staff("staff-1"), Utc::now()).await;
    assert!(matches!(
        late,
        Err(GovernanceError::AlreadyResolved { status: CardStatus::Expired, .. })
    ));
    assert_eq!(h.dispatcher.total_calls(), 0);
    assert!(audit_actions(&h, &card_id).await.contains(&GovernanceAction::CardExpired));
}

// A failed approval dispatch leaves the card APPROVED for a retry.
#[tokio::test]
async fn failed_dispatch_keeps_card_approved_for_retry() {
    let h = harness().await;
    let card_id = pending_card(&h, "deposit_reminder").await;

    h.dispatcher.fail_next(DispatchError::Transport("downstream timeout".to_string()));
    let outcome = h
        .engine
        .approve(&card_id, &ActorRef::staff("staff-1"), Utc::now())
        .await
        .expect("approve itself succeeds");
    assert!(matches!(outcome, ApprovalOutcome::DispatchFailed { .. }));

    let card = h.engine.get(&card_id).await.expect("get");
    assert_eq!(card.status, CardStatus::Approved);
    assert!(audit_actions(&h, &card_id).await.contains(&GovernanceAction::CardDispatchFailed));

    let retried = h
        .engine
        .retry_dispatch(&card_id, &ActorRef::staff("staff-1"), Utc::now())
        .await
        .expect("retry");
    assert!(matches!(retried, ApprovalOutcome::Executed { .. }));
    assert_eq!(h.engine.get(&card_id).await.expect("get").status, CardStatus::Executed);
    assert_eq!(h.dispatcher.calls_for(&card_id), 2);
}

// The lifecycle of a card is visible newest-first in the ledger.
#[tokio::test]
async fn ledger_reads_newest_first_with_diffs() {
    let h = harness().await;
    let card_id = pending_card(&h, "deposit_reminder").await;
    let later: DateTime<Utc> = Utc::now() + Duration::seconds(10);
    h.engine.approve(&card_id, &ActorRef::staff("staff-1"), later).await.expect("approve");

    let entries = h
        .engine
        .list_history(&tenant(), &HistoryFilter::for_entity(&card_id.0))
        .await
        .expect("history");
    assert_eq!(entries.len(), 3);
    // The approval and execution legs share a timestamp; the created entry
    // must still sort last.
    assert!(matches!(
        entries[0].action,
        GovernanceAction::CardApproved | GovernanceAction::CardExecuted
    ));
    assert_eq!(entries.last().expect("created entry").action, GovernanceAction::CardCreated);

    let executed = entries
        .iter()
        .find(|entry| entry.action == GovernanceAction::CardExecuted)
        .expect("executed entry");
    let diff = executed.diff.clone().expect("diff recorded");
    assert_eq!(diff.before, Some(CardStatus::Approved));
    assert_eq!(diff.after, CardStatus::Executed);
}
