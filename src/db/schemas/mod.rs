//! Database schemas for Gatekeeper
//!
//! MongoDB document structures for users, groups, entities, tickets,
//! bookmarks and reset tokens. Ids are stored as uuid strings.

mod bookmark;
mod entity;
mod group;
mod metadata;
mod reset_token;
mod ticket;
mod user;

pub use bookmark::{BookmarkDoc, BOOKMARK_COLLECTION};
pub use entity::{EntityDoc, ENTITY_COLLECTION};
pub use group::{GroupDoc, GROUP_COLLECTION};
pub use metadata::Metadata;
pub use reset_token::{ResetTokenDoc, RESET_TOKEN_COLLECTION};
pub use ticket::{TicketDoc, TicketEventDoc, TICKET_COLLECTION};
pub use user::{MembershipDoc, UserDoc, USER_COLLECTION};
