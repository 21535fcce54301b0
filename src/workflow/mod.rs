//! Workflow Orchestrator
//!
//! `Gatekeeper` wires the stores, the ticket engine and the collaborators
//! together and exposes every operation the HTTP layer needs. Handlers only
//! parse input and render output; all decisions happen here or below.

mod account;
mod admin;
mod entities;
mod tickets;
pub mod views;

pub use views::*;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{hash_password, ResetTokens, SessionIssuer};
use crate::authz::{can, Action, Principal, Resource};
use crate::broker::Broker;
use crate::identity::IdentityStore;
use crate::model::{Group, GroupId, User};
use crate::registry::EntityRegistry;
use crate::store::{Journal, Snapshot};
use crate::tickets::TicketEngine;
use crate::types::{GatekeeperError, Result};

/// Outcome of `Gatekeeper::bootstrap`
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub root_group: Group,
    pub root_user: User,
    pub created_user: bool,
    /// Set when the root account was created without a configured password
    pub generated_password: Option<String>,
}

pub struct Gatekeeper {
    identity: Arc<IdentityStore>,
    registry: Arc<EntityRegistry>,
    tickets: Arc<TicketEngine>,
    resets: ResetTokens,
    sessions: SessionIssuer,
    broker: Arc<dyn Broker>,
    journal: Arc<dyn Journal>,
}

impl Gatekeeper {
    pub fn new(
        journal: Arc<dyn Journal>,
        broker: Arc<dyn Broker>,
        sessions: SessionIssuer,
        reset_ttl_secs: u64,
    ) -> Self {
        let identity = Arc::new(IdentityStore::new(journal.clone()));
        let registry = Arc::new(EntityRegistry::new(journal.clone()));
        let tickets = Arc::new(TicketEngine::new(
            identity.clone(),
            registry.clone(),
            journal.clone(),
        ));

        Self {
            identity,
            registry,
            tickets,
            resets: ResetTokens::new(reset_ttl_secs, journal.clone()),
            sessions,
            broker,
            journal,
        }
    }

    /// Load persisted state. Call once, before serving requests.
    pub fn hydrate(&self, snapshot: Snapshot) {
        info!(
            journal = self.journal.name(),
            users = snapshot.users.len(),
            groups = snapshot.groups.len(),
            entities = snapshot.entities.len(),
            tickets = snapshot.tickets.len(),
            "Hydrating state"
        );
        self.identity.hydrate(snapshot.users, snapshot.groups);
        self.registry.hydrate(snapshot.entities, snapshot.bookmarks);
        self.tickets.hydrate(snapshot.tickets);
        self.resets.hydrate(snapshot.reset_tokens);
    }

    /// Seed the root group and root account. Idempotent.
    pub async fn bootstrap(
        &self,
        root_username: &str,
        root_password: Option<&str>,
    ) -> Result<BootstrapReport> {
        let exists = self.identity.find_by_username(root_username).await.is_some();

        let mut generated_password = None;
        let password_hash = if exists {
            String::new()
        } else {
            let password = match root_password {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => {
                    let p = generate_password();
                    generated_password = Some(p.clone());
                    p
                }
            };
            hash_password(&password)?
        };

        let boot = self.identity.bootstrap(root_username, password_hash).await?;
        if boot.created_group {
            info!(group_id = %boot.root_group.id, "Root group created");
        }
        if boot.created_user {
            info!(
                user_id = %boot.root_user.id,
                username = %boot.root_user.username,
                "Root user created"
            );
        }

        Ok(BootstrapReport {
            root_group: boot.root_group,
            root_user: boot.root_user,
            created_user: boot.created_user,
            generated_password: generated_password.filter(|_| boot.created_user),
        })
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn tickets(&self) -> &Arc<TicketEngine> {
        &self.tickets
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn journal_name(&self) -> &'static str {
        self.journal.name()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Resolve a session token into a principal with authority recomputed
    /// from the user's current memberships
    pub async fn authenticate(&self, token: &str) -> Result<Principal> {
        let claims = self.sessions.verify(token).into_claims()?;
        let user_id = claims.user_id()?;
        let user = self.identity.get_user(user_id).await.map_err(|_| {
            warn!(user_id = %user_id, "Session for a deleted user");
            GatekeeperError::Unauthorized("Session is no longer valid".into())
        })?;
        Ok(self.principal_of(&user))
    }

    /// Like `authenticate`, but an absent token yields an anonymous caller
    pub async fn authenticate_optional(&self, token: Option<&str>) -> Result<Option<Principal>> {
        match token {
            Some(token) => self.authenticate(token).await.map(Some),
            None => Ok(None),
        }
    }

    fn principal_of(&self, user: &User) -> Principal {
        Principal::new(user, self.identity.root_group_id())
    }

    /// Caller required: maps an anonymous caller to `Unauthorized`
    fn require<'a>(&self, principal: Option<&'a Principal>) -> Result<&'a Principal> {
        principal.ok_or_else(|| GatekeeperError::Unauthorized("Authentication required".into()))
    }

    /// Active caller required, checked before any record is looked up
    fn require_active<'a>(&self, principal: Option<&'a Principal>) -> Result<&'a Principal> {
        can(principal, Action::Read, Resource::Catalog).into_result()?;
        self.require(principal)
    }

    async fn group_map(&self) -> HashMap<GroupId, Group> {
        self.identity
            .list_groups()
            .await
            .into_iter()
            .map(|g| (g.id, g))
            .collect()
    }

    async fn user_view(&self, user: &User) -> UserView {
        UserView::build(user, &self.group_map().await, self.identity.is_root_member(user))
    }

    async fn directory(&self) -> Directory {
        Directory {
            users: self
                .identity
                .list_users()
                .await
                .into_iter()
                .map(|u| (u.id, u))
                .collect(),
            groups: self.group_map().await,
            entities: self
                .registry
                .list(&crate::registry::EntityFilter {
                    include_gone: true,
                    ..Default::default()
                })
                .await
                .into_iter()
                .map(|e| (e.id, e))
                .collect(),
        }
    }
}

fn generate_password() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Trimmed optional text, `None` when blank
fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
