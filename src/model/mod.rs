//! Domain model
//!
//! Plain data shared by the stores, the workflow and the persistence layer.

pub mod credential;
pub mod entity;
pub mod identity;
pub mod page;
pub mod ticket;

pub use credential::ResetToken;
pub use entity::{Entity, EntityId, EntityKind, EntityRef};
pub use identity::{Group, GroupId, Membership, Role, User, UserId, UserStatus, ROOT_GROUP};
pub use page::{Page, PageRequest, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use ticket::{
    Resolution, Ticket, TicketAction, TicketEvent, TicketId, TicketKind, TicketPayload,
    TicketStatus,
};
