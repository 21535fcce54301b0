//! HTTP routes for Gatekeeper

pub mod auth_routes;
pub mod common;
pub mod entities;
pub mod groups;
pub mod health;
pub mod tickets;
pub mod users;

pub use auth_routes::handle_auth_request;
pub use common::BoxBody;
pub use entities::handle_entities_request;
pub use groups::handle_groups_request;
pub use health::{health_check, version_info};
pub use tickets::handle_tickets_request;
pub use users::handle_users_request;
