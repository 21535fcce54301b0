//! MongoDB-backed journal

use async_trait::async_trait;
use bson::doc;
use tracing::{debug, error, info};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    BookmarkDoc, EntityDoc, GroupDoc, ResetTokenDoc, TicketDoc, UserDoc, BOOKMARK_COLLECTION,
    ENTITY_COLLECTION, GROUP_COLLECTION, RESET_TOKEN_COLLECTION, TICKET_COLLECTION,
    USER_COLLECTION,
};
use crate::model::{Entity, Group, ResetToken, Ticket, User};
use crate::store::{Change, Journal, Snapshot};
use crate::types::{GatekeeperError, Result};

/// Keep the rows that convert, log the ones that don't
fn convert<D, T>(docs: Vec<D>, what: &str) -> Vec<T>
where
    T: TryFrom<D, Error = GatekeeperError>,
{
    docs.into_iter()
        .filter_map(|doc| match T::try_from(doc) {
            Ok(row) => Some(row),
            Err(e) => {
                error!("Skipping unreadable {} document: {}", what, e);
                None
            }
        })
        .collect()
}

pub struct MongoJournal {
    users: MongoCollection<UserDoc>,
    groups: MongoCollection<GroupDoc>,
    entities: MongoCollection<EntityDoc>,
    tickets: MongoCollection<TicketDoc>,
    bookmarks: MongoCollection<BookmarkDoc>,
    reset_tokens: MongoCollection<ResetTokenDoc>,
}

impl MongoJournal {
    /// Open every collection and make sure its indexes exist
    pub async fn open(client: &MongoClient) -> Result<Self> {
        let journal = Self {
            users: client.collection(USER_COLLECTION).await?,
            groups: client.collection(GROUP_COLLECTION).await?,
            entities: client.collection(ENTITY_COLLECTION).await?,
            tickets: client.collection(TICKET_COLLECTION).await?,
            bookmarks: client.collection(BOOKMARK_COLLECTION).await?,
            reset_tokens: client.collection(RESET_TOKEN_COLLECTION).await?,
        };
        info!(db = client.db_name(), "MongoDB journal ready");
        Ok(journal)
    }
}

#[async_trait]
impl Journal for MongoJournal {
    async fn record(&self, change: &Change) -> Result<()> {
        debug!(change = change.label(), "Journal write");
        match change {
            Change::PutUser(user) => {
                self.users
                    .upsert(&user.id.to_string(), UserDoc::from(user))
                    .await
            }
            Change::RemoveUser(id) => {
                self.users.delete_one(&id.to_string()).await?;
                self.bookmarks
                    .delete_many(doc! { "user_id": id.to_string() })
                    .await?;
                Ok(())
            }
            Change::PutGroup(group) => {
                self.groups
                    .upsert(&group.id.to_string(), GroupDoc::from(group))
                    .await
            }
            Change::RemoveGroup(id) => self.groups.delete_one(&id.to_string()).await,
            Change::PutEntity(entity) => {
                self.entities
                    .upsert(&entity.id.to_string(), EntityDoc::from(entity))
                    .await
            }
            Change::PutTicket(ticket) => {
                self.tickets
                    .upsert(&ticket.id.to_string(), TicketDoc::from(ticket))
                    .await
            }
            Change::Bookmark {
                user_id,
                entity_id,
                on: true,
            } => {
                self.bookmarks
                    .upsert(
                        &BookmarkDoc::key(*user_id, *entity_id),
                        BookmarkDoc::new(*user_id, *entity_id),
                    )
                    .await
            }
            Change::Bookmark {
                user_id,
                entity_id,
                on: false,
            } => {
                self.bookmarks
                    .delete_one(&BookmarkDoc::key(*user_id, *entity_id))
                    .await
            }
            Change::PutResetToken(token) => {
                self.reset_tokens
                    .upsert(&token.token, ResetTokenDoc::from(token))
                    .await
            }
            Change::RemoveResetToken(token) => self.reset_tokens.delete_one(token).await,
        }
    }

    async fn load(&self) -> Result<Snapshot> {
        let users: Vec<User> = convert(self.users.find_many(doc! {}).await?, "user");
        let groups: Vec<Group> = convert(self.groups.find_many(doc! {}).await?, "group");
        let entities: Vec<Entity> = convert(self.entities.find_many(doc! {}).await?, "entity");
        let tickets: Vec<Ticket> = convert(self.tickets.find_many(doc! {}).await?, "ticket");
        let reset_tokens: Vec<ResetToken> =
            convert(self.reset_tokens.find_many(doc! {}).await?, "reset token");

        let bookmarks = self
            .bookmarks
            .find_many(doc! {})
            .await?
            .iter()
            .filter_map(|b| match b.pair() {
                Ok(pair) => Some(pair),
                Err(e) => {
                    error!("Skipping unreadable bookmark document: {}", e);
                    None
                }
            })
            .collect();

        Ok(Snapshot {
            users,
            groups,
            entities,
            tickets,
            bookmarks,
            reset_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }
}
