//! End-to-end workflow tests against the Gatekeeper façade
//!
//! Runs with the in-memory broker and no persistence.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gatekeeper::auth::SessionIssuer;
use gatekeeper::authz::Principal;
use gatekeeper::broker::{Broker, BrokerOp, EntityStats, MemoryBroker};
use gatekeeper::model::{
    EntityId, EntityRef, GroupId, Membership, PageRequest, Role, TicketStatus, UserStatus,
};
use gatekeeper::store::{Change, Journal, NullJournal, Snapshot};
use gatekeeper::types::{GatekeeperError, Result};
use gatekeeper::workflow::{
    ClaimRequest, CreateUserRequest, EntityQuery, GroupRequest, LoginRequest,
    ResetPasswordRequest, ResolveRequest, SignupRequest, UpdateUserRequest,
};
use gatekeeper::Gatekeeper;

const ROOT_PASSWORD: &str = "root-password-for-tests";
const PASSWORD: &str = "correct-horse-battery";

struct World {
    gk: Arc<Gatekeeper>,
    broker: Arc<MemoryBroker>,
    root: Principal,
    payments: GroupId,
    orders: GroupId,
}

impl World {
    async fn new() -> Self {
        Self::with_journal(Arc::new(NullJournal)).await
    }

    async fn with_journal(journal: Arc<dyn Journal>) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        broker.add_topic("payments");
        broker.add_channel("payments", "ledger");
        broker.add_topic("orders");

        let gk = Arc::new(Gatekeeper::new(
            journal,
            broker.clone() as Arc<dyn Broker>,
            SessionIssuer::new_dev(3600),
            3600,
        ));
        gk.bootstrap("root", Some(ROOT_PASSWORD)).await.unwrap();
        let root = login(&gk, "root", ROOT_PASSWORD).await;

        let payments = group(&gk, &root, "payment-team").await;
        let orders = group(&gk, &root, "order-team").await;
        gk.sync_entities(Some(&root)).await.unwrap();

        Self {
            gk,
            broker,
            root,
            payments,
            orders,
        }
    }

    /// Admin-created account, activated through its reset token
    async fn user(&self, username: &str, memberships: &[(GroupId, Role)]) -> Principal {
        let created = self
            .gk
            .create_user(
                Some(&self.root),
                CreateUserRequest {
                    username: username.to_string(),
                    name: String::new(),
                    memberships: memberships
                        .iter()
                        .map(|&(group_id, role)| Membership { group_id, role })
                        .collect(),
                },
            )
            .await
            .unwrap();
        self.gk
            .reset_password(ResetPasswordRequest {
                token: created.reset.token,
                password: PASSWORD.to_string(),
                confirm_password: PASSWORD.to_string(),
            })
            .await
            .unwrap();
        login(&self.gk, username, PASSWORD).await
    }

    async fn entity(&self, reference: EntityRef) -> EntityId {
        self.gk.registry().find(&reference).await.unwrap().id
    }

    async fn claim(
        &self,
        principal: &Principal,
        entity: EntityId,
        group_id: GroupId,
    ) -> Result<gatekeeper::workflow::TicketView> {
        self.gk
            .claim_entity(
                Some(principal),
                entity,
                ClaimRequest {
                    group_id,
                    reason: Some("we run this".into()),
                },
            )
            .await
    }

    async fn resolve(
        &self,
        principal: &Principal,
        ticket: uuid::Uuid,
        action: &str,
    ) -> Result<gatekeeper::workflow::TicketView> {
        self.gk
            .resolve_ticket(
                Some(principal),
                ticket,
                ResolveRequest {
                    action: action.to_string(),
                    reason: None,
                },
            )
            .await
    }
}

async fn login(gk: &Gatekeeper, username: &str, password: &str) -> Principal {
    let session = gk
        .login(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
        .unwrap();
    gk.authenticate(&session.token).await.unwrap()
}

async fn group(gk: &Gatekeeper, root: &Principal, name: &str) -> GroupId {
    gk.create_group(
        Some(root),
        GroupRequest {
            name: Some(name.to_string()),
            description: None,
        },
    )
    .await
    .unwrap()
    .id
}

fn signup(username: &str, group_id: GroupId, confirm: &str) -> SignupRequest {
    SignupRequest {
        username: username.to_string(),
        name: format!("{username} example"),
        password: PASSWORD.to_string(),
        confirm_password: confirm.to_string(),
        group_id,
        role: None,
        reason: None,
    }
}

#[tokio::test]
async fn test_claim_approval_scenario() {
    let w = World::new().await;
    let bob = w.user("bob", &[(w.orders, Role::Member)]).await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;

    // alice files a claim; ownership does not move yet
    let ticket = w.claim(&alice, topic, w.payments).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(ticket.title, "Claim topic payments for group payment-team");
    assert_eq!(w.gk.registry().get(topic).await.unwrap().owner, None);

    // bob is not an assignee
    let bobs = w
        .gk
        .list_assigned_tickets(Some(&bob), false, PageRequest::default())
        .await
        .unwrap();
    assert!(bobs.items.is_empty());

    let assigned = w
        .gk
        .list_assigned_tickets(Some(&charlie), false, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(assigned.items.len(), 1);
    assert_eq!(assigned.items[0].id, ticket.id);

    let approved = w.resolve(&charlie, ticket.id, "approve").await.unwrap();
    assert_eq!(approved.status, TicketStatus::Approved);
    assert_eq!(
        w.gk.registry().get(topic).await.unwrap().owner,
        Some(w.payments)
    );

    // bob from another group cannot describe it
    let denied = w
        .gk
        .update_entity_description(Some(&bob), topic, "bob was here")
        .await;
    assert!(matches!(denied, Err(GatekeeperError::Forbidden(_))));

    // neither can a plain member of the owning group
    let denied = w
        .gk
        .update_entity_description(Some(&alice), topic, "alice was here")
        .await;
    assert!(matches!(denied, Err(GatekeeperError::Forbidden(_))));

    let view = w
        .gk
        .update_entity_description(Some(&charlie), topic, "Card payments")
        .await
        .unwrap();
    assert_eq!(view.description, "Card payments");
    assert!(view.can_manage);

    let detail = w.gk.ticket_detail(Some(&alice), ticket.id).await.unwrap();
    assert_eq!(detail.history.len(), 2);
    assert!(!detail.can_resolve);
}

#[tokio::test]
async fn test_signup_password_mismatch_creates_nothing() {
    let w = World::new().await;
    let before = w.gk.list_users(Some(&w.root)).await.unwrap().len();

    let result = w.gk.signup(signup("dave", w.payments, "something-else")).await;
    assert!(matches!(result, Err(GatekeeperError::Validation(_))));

    assert_eq!(w.gk.list_users(Some(&w.root)).await.unwrap().len(), before);
    assert!(w.gk.identity().find_by_username("dave").await.is_none());
    assert_eq!(w.gk.tickets().pending_count(), 0);
}

#[tokio::test]
async fn test_login_after_signup_approval() {
    let w = World::new().await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;

    let receipt = w.gk.signup(signup("erin", w.payments, PASSWORD)).await.unwrap();
    assert_eq!(receipt.status, UserStatus::Pending);

    // duplicate usernames are refused
    let again = w.gk.signup(signup("erin", w.payments, PASSWORD)).await;
    assert!(matches!(again, Err(GatekeeperError::DuplicateUsername(_))));

    let pending_login = w
        .gk
        .login(LoginRequest {
            username: "erin".into(),
            password: PASSWORD.into(),
        })
        .await;
    assert!(matches!(pending_login, Err(GatekeeperError::Unauthorized(_))));

    w.resolve(&charlie, receipt.application_id, "approve")
        .await
        .unwrap();

    let erin = login(&w.gk, "erin", PASSWORD).await;
    assert!(erin.active);
    let me = w.gk.me(Some(&erin)).await.unwrap();
    assert_eq!(me.status, UserStatus::Active);
    assert_eq!(me.memberships.len(), 1);
    assert_eq!(me.memberships[0].group_id, w.payments);
    assert_eq!(me.memberships[0].role, Role::Member);
    assert!(!me.is_root);
}

#[tokio::test]
async fn test_rejected_signup_stays_pending_user() {
    let w = World::new().await;
    let receipt = w.gk.signup(signup("frank", w.orders, PASSWORD)).await.unwrap();

    let rejected = w
        .gk
        .resolve_ticket(
            Some(&w.root),
            receipt.application_id,
            ResolveRequest {
                action: "reject".into(),
                reason: Some("unknown applicant".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, TicketStatus::Rejected);
    assert_eq!(rejected.resolution_reason.as_deref(), Some("unknown applicant"));

    let frank = w.gk.identity().get_user(receipt.user_id).await.unwrap();
    assert_eq!(frank.status, UserStatus::Pending);

    // no pending tickets remain, so root may remove the applicant
    w.gk.delete_user(Some(&w.root), receipt.user_id).await.unwrap();
}

#[tokio::test]
async fn test_root_group_cannot_be_deleted() {
    let w = World::new().await;
    let root_group = w.gk.identity().root_group_id().unwrap();
    let alice = w.user("alice", &[(w.payments, Role::Admin)]).await;

    for caller in [&w.root, &alice] {
        let result = w.gk.delete_group(Some(caller), root_group).await;
        assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));
    }
    assert!(w.gk.identity().get_group(root_group).await.is_ok());
}

#[tokio::test]
async fn test_group_deletion_blocked_by_references() {
    let w = World::new().await;
    w.user("alice", &[(w.payments, Role::Member)]).await;

    let with_member = w.gk.delete_group(Some(&w.root), w.payments).await;
    assert!(matches!(with_member, Err(GatekeeperError::EntityReferenced(_))));

    // an empty group with a pending signup is still referenced
    let empty = group(&w.gk, &w.root, "empty-team").await;
    w.gk.signup(signup("gina", empty, PASSWORD)).await.unwrap();
    let with_ticket = w.gk.delete_group(Some(&w.root), empty).await;
    assert!(matches!(with_ticket, Err(GatekeeperError::EntityReferenced(_))));

    let spare = group(&w.gk, &w.root, "spare-team").await;
    w.gk.delete_group(Some(&w.root), spare).await.unwrap();
    assert!(matches!(
        w.gk.identity().get_group(spare).await,
        Err(GatekeeperError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_self_approval_is_forbidden() {
    let w = World::new().await;
    let topic = w.entity(EntityRef::topic("orders")).await;

    let ticket = w.claim(&w.root, topic, w.orders).await.unwrap();
    let result = w.resolve(&w.root, ticket.id, "approve").await;
    assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

    let ticket = w.gk.tickets().get(ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(w.gk.registry().get(topic).await.unwrap().owner, None);
}

#[tokio::test]
async fn test_concurrent_resolve_applies_once() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let ticket = w.claim(&alice, topic, w.payments).await.unwrap();

    let mut handles = Vec::new();
    for resolver in [charlie.clone(), w.root.clone(), charlie] {
        let gk = w.gk.clone();
        let id = ticket.id;
        handles.push(tokio::spawn(async move {
            gk.resolve_ticket(
                Some(&resolver),
                id,
                ResolveRequest {
                    action: "approve".into(),
                    reason: None,
                },
            )
            .await
        }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(t) => {
                assert_eq!(t.status, TicketStatus::Approved);
                approved += 1;
            }
            Err(GatekeeperError::AlreadyResolved(id)) => assert_eq!(id, ticket.id),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(approved, 1);

    let detail = w.gk.ticket_detail(Some(&alice), ticket.id).await.unwrap();
    assert_eq!(detail.history.len(), 2);
}

#[tokio::test]
async fn test_duplicate_claims_create_one_ticket() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let channel = w.entity(EntityRef::channel("payments", "ledger")).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gk = w.gk.clone();
        let requester = alice.clone();
        let group_id = w.payments;
        handles.push(tokio::spawn(async move {
            gk.claim_entity(
                Some(&requester),
                channel,
                ClaimRequest {
                    group_id,
                    reason: None,
                },
            )
            .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(GatekeeperError::DuplicatePending(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(w.gk.tickets().pending_count(), 1);

    let detail = w.gk.entity_detail(Some(&alice), channel).await.unwrap();
    assert!(detail.pending_claim.is_some());
}

#[tokio::test]
async fn test_claim_rules() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let topic = w.entity(EntityRef::topic("orders")).await;

    // only on behalf of one's own group
    let foreign = w.claim(&alice, topic, w.orders).await;
    assert!(matches!(foreign, Err(GatekeeperError::Forbidden(_))));

    // anonymous callers are refused
    let anonymous = w
        .gk
        .claim_entity(
            None,
            topic,
            ClaimRequest {
                group_id: w.payments,
                reason: None,
            },
        )
        .await;
    assert!(matches!(anonymous, Err(GatekeeperError::Unauthorized(_))));

    // entities the broker dropped cannot be claimed
    w.broker.delete(&EntityRef::topic("orders")).await.unwrap();
    w.gk.sync_entities(Some(&w.root)).await.unwrap();
    let gone = w.claim(&alice, topic, w.payments).await;
    assert!(matches!(gone, Err(GatekeeperError::Conflict(_))));
}

#[tokio::test]
async fn test_failed_side_effect_keeps_ticket_pending() {
    /// Refuses to persist ownership changes while `broken` is set
    #[derive(Default)]
    struct BrokenOwnership {
        broken: AtomicBool,
    }

    #[async_trait]
    impl Journal for BrokenOwnership {
        async fn record(&self, change: &Change) -> Result<()> {
            match change {
                Change::PutEntity(e)
                    if e.owner.is_some() && self.broken.load(Ordering::SeqCst) =>
                {
                    Err(GatekeeperError::Database("write refused".into()))
                }
                _ => Ok(()),
            }
        }

        async fn load(&self) -> Result<Snapshot> {
            Ok(Snapshot::default())
        }

        fn name(&self) -> &'static str {
            "broken-ownership"
        }
    }

    let journal = Arc::new(BrokenOwnership::default());
    let w = World::with_journal(journal.clone()).await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let ticket = w.claim(&alice, topic, w.payments).await.unwrap();

    journal.broken.store(true, Ordering::SeqCst);
    let result = w.resolve(&w.root, ticket.id, "approve").await;
    assert!(matches!(result, Err(GatekeeperError::Database(_))));
    assert!(result.unwrap_err().is_retryable());

    assert_eq!(
        w.gk.tickets().get(ticket.id).await.unwrap().status,
        TicketStatus::Pending
    );
    assert_eq!(w.gk.registry().get(topic).await.unwrap().owner, None);

    // the retry goes through once persistence recovers
    journal.broken.store(false, Ordering::SeqCst);
    let approved = w.resolve(&w.root, ticket.id, "approve").await.unwrap();
    assert_eq!(approved.status, TicketStatus::Approved);
    assert_eq!(
        w.gk.registry().get(topic).await.unwrap().owner,
        Some(w.payments)
    );
}

#[tokio::test]
async fn test_bookmarks_are_scoped_to_the_caller() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let bob = w.user("bob", &[(w.orders, Role::Member)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;

    let state = w.gk.toggle_bookmark(Some(&alice), topic).await.unwrap();
    assert!(state.bookmarked);

    let bookmarked = EntityQuery {
        bookmarked: true,
        ..Default::default()
    };
    let mine = w
        .gk
        .list_entities(Some(&alice), bookmarked.clone())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, topic);
    assert!(mine[0].bookmarked);

    assert!(w
        .gk
        .list_entities(Some(&bob), bookmarked)
        .await
        .unwrap()
        .is_empty());
    let all = w
        .gk
        .list_entities(Some(&bob), EntityQuery::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|e| !e.bookmarked));

    let anonymous = w.gk.toggle_bookmark(None, topic).await;
    assert!(matches!(anonymous, Err(GatekeeperError::Unauthorized(_))));

    let state = w.gk.toggle_bookmark(Some(&alice), topic).await.unwrap();
    assert!(!state.bookmarked);
}

#[tokio::test]
async fn test_assigned_tickets_paginate() {
    let w = World::new().await;
    for i in 0..24 {
        w.broker.add_topic(&format!("events-{i:02}"));
    }
    w.gk.sync_entities(Some(&w.root)).await.unwrap();
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;

    let topics = w
        .gk
        .list_entities(Some(&alice), EntityQuery::default())
        .await
        .unwrap();
    let topics: Vec<_> = topics
        .into_iter()
        .filter(|e| e.name.starts_with("events-"))
        .collect();
    assert_eq!(topics.len(), 24);
    for entity in &topics {
        w.claim(&alice, entity.id, w.payments).await.unwrap();
    }

    let first = w
        .gk
        .list_assigned_tickets(Some(&charlie), false, PageRequest::new(Some(1), Some(20)))
        .await
        .unwrap();
    assert_eq!(first.items.len(), 20);
    assert!(first.has_more);

    let second = w
        .gk
        .list_assigned_tickets(Some(&charlie), false, PageRequest::new(Some(2), Some(20)))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 4);
    assert!(!second.has_more);

    // resolved tickets drop out unless asked for
    w.resolve(&charlie, second.items[0].id, "reject").await.unwrap();
    let pending = w
        .gk
        .list_assigned_tickets(Some(&charlie), false, PageRequest::new(Some(1), Some(100)))
        .await
        .unwrap();
    assert_eq!(pending.items.len(), 23);
    let everything = w
        .gk
        .list_assigned_tickets(Some(&charlie), true, PageRequest::new(Some(1), Some(100)))
        .await
        .unwrap();
    assert_eq!(everything.items.len(), 24);

    let mine = w
        .gk
        .list_my_tickets(Some(&alice), PageRequest::new(Some(1), Some(100)))
        .await
        .unwrap();
    assert_eq!(mine.items.len(), 24);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;

    let issued = w.gk.request_reset(Some(&w.root), alice.user_id).await.unwrap();
    let lookup = w.gk.reset_lookup(&issued.token).unwrap();
    assert_eq!(lookup.username, "alice");

    // non-root callers cannot issue tokens
    let denied = w.gk.request_reset(Some(&alice), alice.user_id).await;
    assert!(matches!(denied, Err(GatekeeperError::Forbidden(_))));

    let mismatch = w
        .gk
        .reset_password(ResetPasswordRequest {
            token: issued.token.clone(),
            password: "new-password-1".into(),
            confirm_password: "new-password-2".into(),
        })
        .await;
    assert!(matches!(mismatch, Err(GatekeeperError::Validation(_))));

    w.gk.reset_password(ResetPasswordRequest {
        token: issued.token.clone(),
        password: "new-password-1".into(),
        confirm_password: "new-password-1".into(),
    })
    .await
    .unwrap();

    // tokens are single use
    assert!(matches!(
        w.gk.reset_lookup(&issued.token),
        Err(GatekeeperError::Validation(_))
    ));

    let old = w
        .gk
        .login(LoginRequest {
            username: "alice".into(),
            password: PASSWORD.into(),
        })
        .await;
    assert!(matches!(old, Err(GatekeeperError::Unauthorized(_))));
    login(&w.gk, "alice", "new-password-1").await;
}

#[tokio::test]
async fn test_entity_operations_follow_the_broker() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;
    let channel = w.entity(EntityRef::channel("payments", "ledger")).await;

    let ticket = w.claim(&alice, channel, w.payments).await.unwrap();
    w.resolve(&charlie, ticket.id, "approve").await.unwrap();

    let denied = w
        .gk
        .entity_operation(Some(&alice), channel, BrokerOp::Pause)
        .await;
    assert!(matches!(denied, Err(GatekeeperError::Forbidden(_))));

    let paused = w
        .gk
        .entity_operation(Some(&charlie), channel, BrokerOp::Pause)
        .await
        .unwrap();
    assert!(paused.paused);
    assert!(w
        .broker
        .is_paused(&EntityRef::channel("payments", "ledger"))
        .await
        .unwrap());

    // a broker outage leaves the registry untouched
    w.broker.set_unavailable(true);
    let failed = w
        .gk
        .entity_operation(Some(&charlie), channel, BrokerOp::Resume)
        .await;
    assert!(matches!(failed, Err(GatekeeperError::Dependency(_))));
    assert!(w.gk.registry().get(channel).await.unwrap().paused);
    w.broker.set_unavailable(false);

    let resumed = w
        .gk
        .entity_operation(Some(&charlie), channel, BrokerOp::Resume)
        .await
        .unwrap();
    assert!(!resumed.paused);
}

#[tokio::test]
async fn test_user_with_pending_ticket_cannot_be_deleted() {
    let w = World::new().await;
    let receipt = w.gk.signup(signup("hank", w.orders, PASSWORD)).await.unwrap();

    let result = w.gk.delete_user(Some(&w.root), receipt.user_id).await;
    assert!(matches!(result, Err(GatekeeperError::EntityReferenced(_))));

    let own = w.gk.delete_user(Some(&w.root), w.root.user_id).await;
    assert!(matches!(own, Err(GatekeeperError::Forbidden(_))));
}

#[tokio::test]
async fn test_unrelated_users_cannot_view_tickets() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let bob = w.user("bob", &[(w.orders, Role::Admin)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let ticket = w.claim(&alice, topic, w.payments).await.unwrap();

    let result = w.gk.ticket_detail(Some(&bob), ticket.id).await;
    assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

    let detail = w.gk.ticket_detail(Some(&w.root), ticket.id).await.unwrap();
    assert!(detail.can_resolve);
}

#[tokio::test]
async fn test_active_users_keep_a_group() {
    let w = World::new().await;
    let before = w.gk.list_users(Some(&w.root)).await.unwrap().len();

    let result = w
        .gk
        .create_user(
            Some(&w.root),
            CreateUserRequest {
                username: "lonely".into(),
                name: String::new(),
                memberships: vec![],
            },
        )
        .await;
    assert!(matches!(result, Err(GatekeeperError::Validation(_))));
    assert_eq!(w.gk.list_users(Some(&w.root)).await.unwrap().len(), before);

    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let result = w
        .gk
        .update_user(
            Some(&w.root),
            alice.user_id,
            UpdateUserRequest {
                name: None,
                status: None,
                memberships: Some(vec![]),
            },
        )
        .await;
    assert!(matches!(result, Err(GatekeeperError::Validation(_))));

    let user = w.gk.identity().get_user(alice.user_id).await.unwrap();
    assert_eq!(user.status, UserStatus::Active);
    assert_eq!(user.memberships.len(), 1);
}

#[tokio::test]
async fn test_resolve_checks_permission_before_state() {
    let w = World::new().await;
    let bob = w.user("bob", &[(w.orders, Role::Member)]).await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let charlie = w.user("charlie", &[(w.payments, Role::Admin)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let ticket = w.claim(&alice, topic, w.payments).await.unwrap();

    w.resolve(&charlie, ticket.id, "approve").await.unwrap();

    // the requester stays forbidden after resolution
    let result = w.resolve(&alice, ticket.id, "reject").await;
    assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

    // so does an outsider
    let result = w.resolve(&bob, ticket.id, "reject").await;
    assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

    let result = w.resolve(&charlie, ticket.id, "reject").await;
    assert!(matches!(result, Err(GatekeeperError::AlreadyResolved(_))));
}

#[tokio::test]
async fn test_inactive_caller_learns_nothing_about_entities() {
    let w = World::new().await;
    let mut idle = w.user("alice", &[(w.payments, Role::Admin)]).await;
    idle.active = false;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let missing = uuid::Uuid::new_v4();

    for id in [topic, missing] {
        let result = w.gk.toggle_bookmark(Some(&idle), id).await;
        assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

        let result = w
            .gk
            .update_entity_description(Some(&idle), id, "idle was here")
            .await;
        assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));

        let result = w.gk.entity_operation(Some(&idle), id, BrokerOp::Pause).await;
        assert!(matches!(result, Err(GatekeeperError::Forbidden(_))));
    }
    assert_eq!(w.gk.registry().get(topic).await.unwrap().description, "");
}

#[tokio::test]
async fn test_entity_detail_reports_broker_stats() {
    let w = World::new().await;
    let alice = w.user("alice", &[(w.payments, Role::Member)]).await;
    let topic = w.entity(EntityRef::topic("payments")).await;
    let channel = w.entity(EntityRef::channel("payments", "ledger")).await;
    w.broker.publish("payments", 7);
    w.broker
        .empty(&EntityRef::channel("payments", "ledger"))
        .await
        .unwrap();

    let detail = w.gk.entity_detail(Some(&alice), topic).await.unwrap();
    assert_eq!(detail.stats, Some(EntityStats { depth: 7, messages: 7 }));
    assert_eq!(detail.channels.len(), 1);

    let detail = w.gk.entity_detail(Some(&alice), channel).await.unwrap();
    assert_eq!(detail.stats, Some(EntityStats { depth: 0, messages: 7 }));

    // the page still renders without the broker
    w.broker.set_unavailable(true);
    let detail = w.gk.entity_detail(Some(&alice), topic).await.unwrap();
    assert_eq!(detail.stats, None);
    assert_eq!(detail.entity.id, topic);
}
