//! User document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::{parse_field, parse_id};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Membership, User};
use crate::types::GatekeeperError;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDoc {
    pub group_id: String,
    pub role: String,
}

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// User id (uuid string)
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub username: String,

    #[serde(default)]
    pub name: String,

    /// Argon2 password hash, empty until a password has been set
    #[serde(default)]
    pub password_hash: String,

    /// pending, active or disabled
    pub status: String,

    #[serde(default)]
    pub memberships: Vec<MembershipDoc>,
}

impl From<&User> for UserDoc {
    fn from(user: &User) -> Self {
        Self {
            _id: user.id.to_string(),
            metadata: Metadata::at(user.created_at, user.updated_at),
            username: user.username.clone(),
            name: user.name.clone(),
            password_hash: user.password_hash.clone(),
            status: user.status.to_string(),
            memberships: user
                .memberships
                .iter()
                .map(|m| MembershipDoc {
                    group_id: m.group_id.to_string(),
                    role: m.role.to_string(),
                })
                .collect(),
        }
    }
}

impl TryFrom<UserDoc> for User {
    type Error = GatekeeperError;

    fn try_from(doc: UserDoc) -> Result<Self, Self::Error> {
        let memberships = doc
            .memberships
            .iter()
            .map(|m| {
                Ok(Membership {
                    group_id: parse_id(&m.group_id, "group")?,
                    role: parse_field(&m.role, "role")?,
                })
            })
            .collect::<Result<Vec<_>, GatekeeperError>>()?;

        Ok(User {
            id: parse_id(&doc._id, "user")?,
            username: doc.username,
            name: doc.name,
            password_hash: doc.password_hash,
            status: parse_field(&doc.status, "user status")?,
            memberships,
            created_at: doc.metadata.created(),
            updated_at: doc.metadata.updated(),
        })
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("username_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "memberships.group_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("membership_group_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, UserStatus};
    use uuid::Uuid;

    #[test]
    fn test_user_doc_conversion() {
        let mut user = User::new("alice", "Alice", "$argon2id$hash".into(), UserStatus::Active);
        let group = Uuid::new_v4();
        user.set_membership(group, Role::Admin);

        let doc = UserDoc::from(&user);
        assert_eq!(doc.status, "active");
        assert_eq!(doc.memberships[0].role, "admin");

        let back = User::try_from(doc).unwrap();
        assert_eq!(back.id, user.id);
        assert_eq!(back.role_in(group), Some(Role::Admin));
        assert_eq!(back.created_at.timestamp_millis(), user.created_at.timestamp_millis());
    }

    #[test]
    fn test_corrupt_status_is_rejected() {
        let user = User::new("bob", "Bob", String::new(), UserStatus::Pending);
        let mut doc = UserDoc::from(&user);
        doc.status = "sleeping".into();
        assert!(matches!(User::try_from(doc), Err(GatekeeperError::Database(_))));
    }
}
