//! Password reset token document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::parse_id;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::ResetToken;
use crate::types::GatekeeperError;

pub const RESET_TOKEN_COLLECTION: &str = "reset_tokens";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ResetTokenDoc {
    /// The token itself
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,

    pub username: String,

    pub expires_at: Option<DateTime>,
}

impl From<&ResetToken> for ResetTokenDoc {
    fn from(token: &ResetToken) -> Self {
        Self {
            _id: token.token.clone(),
            metadata: Metadata::at(token.created_at, token.created_at),
            user_id: token.user_id.to_string(),
            username: token.username.clone(),
            expires_at: Some(DateTime::from_chrono(token.expires_at)),
        }
    }
}

impl TryFrom<ResetTokenDoc> for ResetToken {
    type Error = GatekeeperError;

    fn try_from(doc: ResetTokenDoc) -> Result<Self, Self::Error> {
        let created_at = doc.metadata.created();
        Ok(ResetToken {
            user_id: parse_id(&doc.user_id, "user")?,
            token: doc._id,
            username: doc.username,
            created_at,
            // A token without expiry is treated as already expired
            expires_at: doc.expires_at.map(|d| d.to_chrono()).unwrap_or(created_at),
        })
    }
}

impl IntoIndexes for ResetTokenDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1 },
                Some(IndexOptions::builder().name("user_index".to_string()).build()),
            ),
            // MongoDB removes expired tokens on its own
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("expires_ttl".to_string())
                        .expire_after(std::time::Duration::from_secs(0))
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ResetTokenDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
