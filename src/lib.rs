//! Easy Chat - a conversation log reconciled against a generative-language service
//!
//! The user sends messages, a placeholder stands in for each outstanding
//! reply, and replies (or errors) are reconciled into the log as they arrive.
//! The log survives restarts through a local SQLite store and is driven over
//! a small JSON API.

pub mod config;
pub mod conversation;
pub mod core;
pub mod providers;
pub mod routes;

use crate::config::Config;
use crate::core::SessionHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub session: SessionHandle,
}
