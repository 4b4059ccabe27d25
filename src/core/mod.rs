//! Session core
//!
//! The session controller that owns the live conversation, and the store it
//! is persisted to between sessions.

mod memory;
mod session;

pub use memory::{ConversationStore, MemoryStore, StoreError};
pub use session::{ChatSession, Queued, SessionError, SessionHandle};
