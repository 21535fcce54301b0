//! Shared types

pub mod error;

pub use error::{GatekeeperError, Result};
