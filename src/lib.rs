//! Gatekeeper - ownership claims and approvals for NSQ topics and channels
//!
//! Users claim topics and channels on behalf of a group. Claims, like signup
//! applications, become tickets that group admins or root members approve or
//! reject. Every mutating action on an entity is checked against the caller's
//! role in the owning group.
//!
//! ## Components
//!
//! - **Identity**: users, groups and role memberships
//! - **Registry**: topics and channels mirrored from the broker, with ownership and bookmarks
//! - **Tickets**: signup and claim tickets with a single-resolution state machine
//! - **Authz**: the `can(principal, action, resource)` decision function
//! - **Workflow**: the `Gatekeeper` façade the HTTP routes call

pub mod auth;
pub mod authz;
pub mod broker;
pub mod config;
pub mod db;
pub mod identity;
pub mod model;
pub mod registry;
pub mod routes;
pub mod server;
pub mod store;
pub mod tickets;
pub mod types;
pub mod workflow;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatekeeperError, Result};
pub use workflow::Gatekeeper;
