//! Group document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::parse_id;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::Group;
use crate::types::GatekeeperError;

pub const GROUP_COLLECTION: &str = "groups";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GroupDoc {
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    #[serde(default)]
    pub description: String,
}

impl From<&Group> for GroupDoc {
    fn from(group: &Group) -> Self {
        Self {
            _id: group.id.to_string(),
            metadata: Metadata::at(group.created_at, group.updated_at),
            name: group.name.clone(),
            description: group.description.clone(),
        }
    }
}

impl TryFrom<GroupDoc> for Group {
    type Error = GatekeeperError;

    fn try_from(doc: GroupDoc) -> Result<Self, Self::Error> {
        Ok(Group {
            id: parse_id(&doc._id, "group")?,
            name: doc.name,
            description: doc.description,
            created_at: doc.metadata.created(),
            updated_at: doc.metadata.updated(),
        })
    }
}

impl IntoIndexes for GroupDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "name": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("name_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for GroupDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
