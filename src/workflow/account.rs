//! Login, signup and password flows

use tracing::{info, warn};

use super::{non_blank, Gatekeeper};
use super::{
    LoginRequest, ResetLookup, ResetPasswordRequest, Session, SignupReceipt, SignupRequest,
    UserView,
};
use crate::auth::{hash_password, validate_new_password, verify_password};
use crate::authz::Principal;
use crate::identity::{validate_username, NewUser};
use crate::model::{Role, TicketPayload, UserStatus};
use crate::types::{GatekeeperError, Result};

fn invalid_credentials() -> GatekeeperError {
    GatekeeperError::Unauthorized("Invalid credentials".into())
}

impl Gatekeeper {
    /// Verify a password and open a session. Every failure, including an
    /// inactive account, looks the same to the caller.
    pub async fn login(&self, request: LoginRequest) -> Result<Session> {
        let Some(user) = self.identity.find_by_username(request.username.trim()).await else {
            warn!(username = %request.username.trim(), "Login for unknown user");
            return Err(invalid_credentials());
        };

        let verified = !user.password_hash.is_empty()
            && verify_password(&request.password, &user.password_hash)?;
        if !verified {
            warn!(user_id = %user.id, "Login with wrong password");
            return Err(invalid_credentials());
        }
        if !user.is_active() {
            warn!(user_id = %user.id, status = %user.status, "Login for inactive account");
            return Err(invalid_credentials());
        }

        let token = self.sessions.issue(&user)?;
        info!(user_id = %user.id, "Session issued");

        Ok(Session {
            token,
            expires_in: self.sessions.expiry_seconds(),
            user: self.user_view(&user).await,
        })
    }

    /// File a signup application: a pending user plus a ticket for the
    /// admins of the requested group
    pub async fn signup(&self, request: SignupRequest) -> Result<SignupReceipt> {
        validate_new_password(&request.password, &request.confirm_password)?;
        validate_username(&request.username)?;

        let username = request.username.trim().to_string();
        let name = match request.name.trim() {
            "" => username.clone(),
            name => name.to_string(),
        };
        let role = request.role.unwrap_or(Role::Member);
        let password_hash = hash_password(&request.password)?;

        // Keeps the target group alive until the ticket exists
        let group = self.identity.hold_group(request.group_id).await?;

        let user = self
            .identity
            .create_user(NewUser {
                username: username.clone(),
                name: name.clone(),
                password_hash,
                status: UserStatus::Pending,
                memberships: Vec::new(),
            })
            .await?;

        let created = self
            .tickets
            .create(
                format!("Signup request by {name} ({username})"),
                TicketPayload::SignupApplication {
                    user_id: user.id,
                    group_id: group.id,
                    role,
                },
                user.id,
                non_blank(request.reason),
            )
            .await;
        drop(group);

        let ticket = match created {
            Ok(ticket) => ticket,
            Err(e) => {
                if let Err(cleanup) = self.identity.delete_user(user.id, |_| Ok(())).await {
                    warn!(
                        user_id = %user.id,
                        "Failed to remove applicant after signup error: {}", cleanup
                    );
                }
                return Err(e);
            }
        };

        info!(
            user_id = %user.id,
            ticket_id = %ticket.id,
            group_id = %request.group_id,
            "Signup application filed"
        );
        Ok(SignupReceipt {
            application_id: ticket.id,
            user_id: user.id,
            status: user.status,
        })
    }

    /// The calling user with memberships and root capability
    pub async fn me(&self, principal: Option<&Principal>) -> Result<UserView> {
        let principal = self.require(principal)?;
        let user = self.identity.get_user(principal.user_id).await?;
        Ok(self.user_view(&user).await)
    }

    /// Username behind a live reset token
    pub fn reset_lookup(&self, token: &str) -> Result<ResetLookup> {
        let record = self.resets.lookup(token)?;
        Ok(ResetLookup {
            username: record.username,
            expires_at: record.expires_at,
        })
    }

    /// Set a new password with a one-time token. Activates accounts created
    /// by an administrator.
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<UserView> {
        validate_new_password(&request.password, &request.confirm_password)?;
        self.resets.lookup(&request.token)?;
        let password_hash = hash_password(&request.password)?;

        let record = self.resets.consume(&request.token).await?;
        let user = match self
            .identity
            .set_password(record.user_id, password_hash, true)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                if !matches!(e, GatekeeperError::NotFound(_)) {
                    if let Err(restore) = self.resets.restore(record).await {
                        warn!("Failed to restore reset token: {}", restore);
                    }
                }
                return Err(e);
            }
        };

        info!(user_id = %user.id, "Password reset completed");
        Ok(self.user_view(&user).await)
    }
}
