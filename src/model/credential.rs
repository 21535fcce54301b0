//! One-time password reset tokens

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::identity::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetToken {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn new(token: String, user_id: UserId, username: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token,
            user_id,
            username: username.to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
