//! HTTP server for Gatekeeper

pub mod http;

pub use http::{handle_request, run, AppState};
