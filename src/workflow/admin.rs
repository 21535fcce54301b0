//! Group and user administration

use tracing::{info, warn};

use super::Gatekeeper;
use super::{
    CreateUserRequest, CreatedUser, GroupRequest, GroupView, ResetIssued, UpdateUserRequest,
    UserView,
};
use crate::authz::{can, Action, Principal, Resource};
use crate::identity::{GroupUpdate, NewUser, UserUpdate};
use crate::model::{GroupId, User, UserId, UserStatus};
use crate::types::{GatekeeperError, Result};

impl Gatekeeper {
    fn require_root(
        &self,
        principal: Option<&Principal>,
        action: Action,
        resource: Resource,
    ) -> Result<()> {
        if let Err(e) = can(principal, action, resource).into_result() {
            warn!(
                user_id = ?principal.map(|p| p.user_id),
                action = ?action,
                "Administration denied: {}", e
            );
            return Err(e);
        }
        Ok(())
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Every group. Public: the signup form offers them.
    pub async fn list_groups(&self) -> Vec<GroupView> {
        self.identity
            .list_groups()
            .await
            .into_iter()
            .map(GroupView::from)
            .collect()
    }

    pub async fn create_group(
        &self,
        principal: Option<&Principal>,
        request: GroupRequest,
    ) -> Result<GroupView> {
        self.require_root(principal, Action::ManageGroups, Resource::Group { root: false })?;
        let name = request
            .name
            .ok_or_else(|| GatekeeperError::Validation("Group name is required".into()))?;

        let group = self
            .identity
            .create_group(&name, request.description.as_deref().unwrap_or(""))
            .await?;
        Ok(group.into())
    }

    pub async fn update_group(
        &self,
        principal: Option<&Principal>,
        id: GroupId,
        request: GroupRequest,
    ) -> Result<GroupView> {
        self.require_root(principal, Action::ManageGroups, Resource::Group { root: false })?;
        let group = self
            .identity
            .update_group(
                id,
                GroupUpdate {
                    name: request.name,
                    description: request.description,
                },
            )
            .await?;
        Ok(group.into())
    }

    /// Delete a group that owns nothing, has no members and no pending
    /// tickets. The root group is refused for everyone.
    pub async fn delete_group(&self, principal: Option<&Principal>, id: GroupId) -> Result<()> {
        let is_root_group = self.identity.root_group_id() == Some(id);
        self.require_root(principal, Action::DeleteGroup, Resource::Group { root: is_root_group })?;

        let tickets = self.tickets.clone();
        let registry = self.registry.clone();
        self.identity
            .delete_group(id, move |group| async move {
                if let Some(ticket_id) = tickets.pending_for_group(group.id) {
                    return Err(GatekeeperError::EntityReferenced(format!(
                        "group '{}' is the target of pending ticket {}",
                        group.name, ticket_id
                    )));
                }
                let owned = registry.owned_by(group.id).await;
                if owned > 0 {
                    return Err(GatekeeperError::EntityReferenced(format!(
                        "group '{}' still owns {} entit{}",
                        group.name,
                        owned,
                        if owned == 1 { "y" } else { "ies" }
                    )));
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn list_users(&self, principal: Option<&Principal>) -> Result<Vec<UserView>> {
        self.require_root(principal, Action::ManageUsers, Resource::Users)?;
        let groups = self.group_map().await;
        Ok(self
            .identity
            .list_users()
            .await
            .iter()
            .map(|u| UserView::build(u, &groups, self.identity.is_root_member(u)))
            .collect())
    }

    /// Create a pending account with its memberships already applied. The
    /// returned one-time token lets the user pick a password and activates
    /// the account.
    pub async fn create_user(
        &self,
        principal: Option<&Principal>,
        request: CreateUserRequest,
    ) -> Result<CreatedUser> {
        self.require_root(principal, Action::ManageUsers, Resource::Users)?;
        if request.memberships.is_empty() {
            return Err(GatekeeperError::Validation(
                "At least one group is required".into(),
            ));
        }

        let name = match request.name.trim() {
            "" => request.username.trim().to_string(),
            name => name.to_string(),
        };
        let user = self
            .identity
            .create_user(NewUser {
                username: request.username,
                name,
                password_hash: String::new(),
                status: UserStatus::Pending,
                memberships: request.memberships,
            })
            .await?;

        let reset = match self.issue_reset(&user).await {
            Ok(reset) => reset,
            Err(e) => {
                if let Err(cleanup) = self.identity.delete_user(user.id, |_| Ok(())).await {
                    warn!(
                        user_id = %user.id,
                        "Failed to remove user after reset token error: {}", cleanup
                    );
                }
                return Err(e);
            }
        };

        Ok(CreatedUser {
            user: self.user_view(&user).await,
            reset,
        })
    }

    pub async fn update_user(
        &self,
        principal: Option<&Principal>,
        id: UserId,
        request: UpdateUserRequest,
    ) -> Result<UserView> {
        self.require_root(principal, Action::ManageUsers, Resource::Users)?;
        let user = self
            .identity
            .update_user(
                id,
                UserUpdate {
                    name: request.name,
                    status: request.status,
                    memberships: request.memberships,
                },
            )
            .await?;
        Ok(self.user_view(&user).await)
    }

    /// Delete a user that has no pending tickets, as requester or subject
    pub async fn delete_user(&self, principal: Option<&Principal>, id: UserId) -> Result<()> {
        self.require_root(principal, Action::ManageUsers, Resource::Users)?;
        if principal.map(|p| p.user_id) == Some(id) {
            return Err(GatekeeperError::Forbidden(
                "You cannot delete your own account".into(),
            ));
        }

        let tickets = self.tickets.clone();
        let user = self
            .identity
            .delete_user(id, |user| match tickets.pending_for_user(user.id) {
                Some(ticket_id) => Err(GatekeeperError::EntityReferenced(format!(
                    "user '{}' has pending ticket {}",
                    user.username, ticket_id
                ))),
                None => Ok(()),
            })
            .await?;

        self.registry.forget_user(user.id);
        self.resets.forget_user(user.id).await;
        Ok(())
    }

    /// Issue a password reset token for any user
    pub async fn request_reset(
        &self,
        principal: Option<&Principal>,
        id: UserId,
    ) -> Result<ResetIssued> {
        self.require_root(principal, Action::ManageUsers, Resource::Users)?;
        let user = self.identity.get_user(id).await?;
        self.issue_reset(&user).await
    }

    async fn issue_reset(&self, user: &User) -> Result<ResetIssued> {
        let token = self.resets.issue(user).await?;
        info!(user_id = %user.id, "Password reset prepared");
        Ok(ResetIssued {
            user_id: user.id,
            username: user.username.clone(),
            token: token.token,
            expires_at: token.expires_at,
        })
    }
}
