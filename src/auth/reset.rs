//! One-time password reset tokens

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};

use crate::model::{ResetToken, User, UserId};
use crate::store::{Change, Journal};
use crate::types::{GatekeeperError, Result};

const TOKEN_BYTES: usize = 32;
const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn invalid() -> GatekeeperError {
    GatekeeperError::Validation("Invalid or expired reset token".into())
}

pub struct ResetTokens {
    tokens: DashMap<String, ResetToken>,
    ttl: Duration,
    journal: Arc<dyn Journal>,
}

impl ResetTokens {
    pub fn new(ttl_secs: u64, journal: Arc<dyn Journal>) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            journal,
        }
    }

    pub fn hydrate(&self, tokens: Vec<ResetToken>) {
        for token in tokens.into_iter().filter(|t| !t.is_expired()) {
            self.tokens.insert(token.token.clone(), token);
        }
    }

    /// Issue a fresh token for `user`, revoking any older one
    pub async fn issue(&self, user: &User) -> Result<ResetToken> {
        let token = ResetToken::new(generate_token(), user.id, &user.username, self.ttl);
        self.journal
            .record(&Change::PutResetToken(token.clone()))
            .await?;

        let stale: Vec<String> = self
            .tokens
            .iter()
            .filter(|t| t.user_id == user.id)
            .map(|t| t.key().clone())
            .collect();
        for old in stale {
            self.revoke(&old).await;
        }
        self.tokens.insert(token.token.clone(), token.clone());

        info!(user_id = %user.id, expires_at = %token.expires_at, "Reset token issued");
        Ok(token)
    }

    /// The live token record, if `token` is known and unexpired
    pub fn lookup(&self, token: &str) -> Result<ResetToken> {
        let record = self.tokens.get(token).map(|t| t.clone()).ok_or_else(invalid)?;
        if record.is_expired() {
            return Err(invalid());
        }
        Ok(record)
    }

    /// Take the token out so it cannot be used twice. Exactly one concurrent
    /// caller gets it.
    pub async fn consume(&self, token: &str) -> Result<ResetToken> {
        let (_, record) = self.tokens.remove(token).ok_or_else(invalid)?;
        if record.is_expired() {
            self.journal
                .record(&Change::RemoveResetToken(record.token.clone()))
                .await?;
            return Err(invalid());
        }
        if let Err(e) = self
            .journal
            .record(&Change::RemoveResetToken(record.token.clone()))
            .await
        {
            self.tokens.insert(record.token.clone(), record);
            return Err(e);
        }
        Ok(record)
    }

    /// Put back a consumed token whose password change failed
    pub async fn restore(&self, record: ResetToken) -> Result<()> {
        self.journal
            .record(&Change::PutResetToken(record.clone()))
            .await?;
        self.tokens.insert(record.token.clone(), record);
        Ok(())
    }

    async fn revoke(&self, token: &str) {
        if self.tokens.remove(token).is_some() {
            if let Err(e) = self
                .journal
                .record(&Change::RemoveResetToken(token.to_string()))
                .await
            {
                debug!("Stale reset token not removed from journal: {}", e);
            }
        }
    }

    /// Drop every token of a deleted user
    pub async fn forget_user(&self, user_id: UserId) {
        let tokens: Vec<String> = self
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.key().clone())
            .collect();
        for token in tokens {
            self.revoke(&token).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserStatus;
    use crate::store::NullJournal;

    fn tokens(ttl: u64) -> ResetTokens {
        ResetTokens::new(ttl, Arc::new(NullJournal))
    }

    #[tokio::test]
    async fn test_issue_lookup_consume() {
        let tokens = tokens(3600);
        let user = User::new("alice", "Alice", String::new(), UserStatus::Pending);
        let issued = tokens.issue(&user).await.unwrap();

        assert_eq!(tokens.lookup(&issued.token).unwrap().username, "alice");
        assert_eq!(tokens.consume(&issued.token).await.unwrap().user_id, user.id);
        assert!(tokens.consume(&issued.token).await.is_err());
        assert!(tokens.lookup(&issued.token).is_err());
    }

    #[tokio::test]
    async fn test_new_token_revokes_old() {
        let tokens = tokens(3600);
        let user = User::new("bob", "Bob", String::new(), UserStatus::Active);
        let first = tokens.issue(&user).await.unwrap();
        let second = tokens.issue(&user).await.unwrap();

        assert_ne!(first.token, second.token);
        assert!(tokens.lookup(&first.token).is_err());
        assert!(tokens.lookup(&second.token).is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let tokens = tokens(0);
        let user = User::new("carol", "Carol", String::new(), UserStatus::Active);
        let issued = tokens.issue(&user).await.unwrap();

        assert!(matches!(
            tokens.lookup(&issued.token),
            Err(GatekeeperError::Validation(_))
        ));
    }

    #[test]
    fn test_tokens_are_url_safe() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
