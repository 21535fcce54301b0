//! Bookmark document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::parse_id;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{EntityId, UserId};
use crate::types::GatekeeperError;

pub const BOOKMARK_COLLECTION: &str = "bookmarks";

/// One (user, entity) bookmark; present means bookmarked
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BookmarkDoc {
    /// `<user_id>:<entity_id>`
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,

    pub entity_id: String,
}

impl BookmarkDoc {
    pub fn key(user_id: UserId, entity_id: EntityId) -> String {
        format!("{user_id}:{entity_id}")
    }

    pub fn new(user_id: UserId, entity_id: EntityId) -> Self {
        Self {
            _id: Self::key(user_id, entity_id),
            metadata: Metadata::now(),
            user_id: user_id.to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    pub fn pair(&self) -> Result<(UserId, EntityId), GatekeeperError> {
        Ok((
            parse_id(&self.user_id, "user")?,
            parse_id(&self.entity_id, "entity")?,
        ))
    }
}

impl IntoIndexes for BookmarkDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(IndexOptions::builder().name("user_index".to_string()).build()),
        )]
    }
}

impl MutMetadata for BookmarkDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
