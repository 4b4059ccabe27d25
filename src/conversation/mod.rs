//! Conversation types and the turn log
//!
//! A [`Conversation`] is an ordered list of [`Turn`]s, oldest first. Every
//! assistant reply sits directly after the user turn it answers; the pairing is
//! positional. Replies are requested asynchronously, so a user turn is first
//! followed by a *placeholder* that is later reconciled by [`TurnId`], never by
//! index, because edits and deletes may shift positions in the meantime.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::CompletionError;

/// Text shown while a reply is outstanding
pub const PLACEHOLDER_TEXT: &str = "Typing...";

/// Text shown in place of a reply that could not be generated
pub const ERROR_TEXT: &str =
    "Oops! Something went wrong while communicating with the AI. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" | "model" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Complete,
    Pending,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Complete => "complete",
            TurnStatus::Pending => "pending",
            TurnStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(TurnStatus::Complete),
            "pending" => Some(TurnStatus::Pending),
            "failed" => Some(TurnStatus::Failed),
            _ => None,
        }
    }
}

/// Session-scoped identity of a turn. Assigned once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `(author, text)` pair of context sent to the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn is_placeholder(&self) -> bool {
        self.status == TurnStatus::Pending
    }

    fn as_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Everything needed to request the reply for a freshly inserted placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    /// The user turn being answered
    pub turn: TurnId,
    pub placeholder: TurnId,
    /// Every other turn in the log, oldest first
    pub history: Vec<Message>,
    /// Current text of the user turn being answered
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a conversation from stored turns, handing out fresh ids
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        let mut conversation = Self::new();
        for turn in turns {
            let id = conversation.allocate_id();
            conversation.turns.push(Turn { id, ..turn });
        }
        conversation
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// Display order: most recent turn first
    pub fn newest_first(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev()
    }

    /// Add a user turn and its placeholder. Blank input is ignored.
    pub fn append(&mut self, question: &str) -> Option<PendingReply> {
        if question.trim().is_empty() {
            return None;
        }

        let user = self.new_turn(Role::User, question, TurnStatus::Complete);
        let placeholder = self.new_turn(Role::Assistant, PLACEHOLDER_TEXT, TurnStatus::Pending);
        let placeholder_id = placeholder.id;

        self.turns.push(user);
        self.turns.push(placeholder);

        tracing::debug!(placeholder = %placeholder_id, len = self.turns.len(), "appended turn");
        Some(self.pending_reply(self.turns.len() - 2, placeholder_id))
    }

    /// Rewrite a user turn in place and queue a fresh reply for it.
    ///
    /// The stale assistant reply directly after the target (if any) is dropped
    /// and a placeholder takes its slot.
    pub fn edit(&mut self, target: TurnId, new_text: &str) -> Option<PendingReply> {
        let index = self.user_index(target)?;
        self.turns[index].content = new_text.to_string();

        let reply_index = index + 1;
        if self
            .turns
            .get(reply_index)
            .is_some_and(|t| t.role == Role::Assistant)
        {
            self.turns.remove(reply_index);
        }

        let placeholder = self.new_turn(Role::Assistant, PLACEHOLDER_TEXT, TurnStatus::Pending);
        let placeholder_id = placeholder.id;
        self.turns.insert(reply_index, placeholder);

        tracing::debug!(turn = %target, placeholder = %placeholder_id, "edited turn");
        Some(self.pending_reply(index, placeholder_id))
    }

    /// Remove a user turn together with the assistant turn right after it.
    /// Returns `false` if the target is not a user turn in this conversation.
    pub fn delete(&mut self, target: TurnId) -> bool {
        let Some(index) = self.user_index(target) else {
            return false;
        };

        if self
            .turns
            .get(index + 1)
            .is_some_and(|t| t.role == Role::Assistant)
        {
            self.turns.remove(index + 1);
        }
        self.turns.remove(index);

        tracing::debug!(turn = %target, len = self.turns.len(), "deleted turn");
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Settle a placeholder with the outcome of its completion request.
    ///
    /// If the placeholder has disappeared (deleted, cleared, or replaced by an
    /// edit) the outcome cannot be placed, and an error turn is appended at the
    /// end instead so it does not vanish silently.
    pub fn reconcile(&mut self, placeholder: TurnId, outcome: Result<String, CompletionError>) {
        let slot = self.turns.iter().position(|t| t.id == placeholder);

        match (outcome, slot) {
            (Ok(text), Some(index)) => {
                let turn = &mut self.turns[index];
                turn.content = text;
                turn.status = TurnStatus::Complete;
            }
            (Err(_), Some(index)) => {
                let turn = &mut self.turns[index];
                turn.content = ERROR_TEXT.to_string();
                turn.status = TurnStatus::Failed;
            }
            (_, None) => {
                tracing::debug!(placeholder = %placeholder, "placeholder gone, appending error");
                let error = self.new_turn(Role::Assistant, ERROR_TEXT, TurnStatus::Failed);
                self.turns.push(error);
            }
        }
    }

    /// Turn placeholders loaded from storage into error turns; nothing will
    /// ever answer them.
    pub fn settle_orphans(&mut self) -> usize {
        let mut settled = 0;
        for turn in self.turns.iter_mut().filter(|t| t.is_placeholder()) {
            turn.content = ERROR_TEXT.to_string();
            turn.status = TurnStatus::Failed;
            settled += 1;
        }
        settled
    }

    fn user_index(&self, id: TurnId) -> Option<usize> {
        self.turns
            .iter()
            .position(|t| t.id == id && t.role == Role::User)
    }

    /// The whole log as it stands, minus the user turn being answered and its
    /// own placeholder
    fn pending_reply(&self, user_index: usize, placeholder: TurnId) -> PendingReply {
        let turn = self.turns[user_index].id;
        let history = self
            .turns
            .iter()
            .filter(|t| t.id != turn && t.id != placeholder)
            .map(Turn::as_message)
            .collect();

        PendingReply {
            turn,
            placeholder,
            history,
            message: self.turns[user_index].content.clone(),
        }
    }

    fn new_turn(&mut self, role: Role, content: &str, status: TurnStatus) -> Turn {
        Turn {
            id: self.allocate_id(),
            role,
            content: content.to_string(),
            status,
            created_at: Utc::now(),
        }
    }

    fn allocate_id(&mut self) -> TurnId {
        let id = TurnId(self.next_id);
        self.next_id += 1;
        id
    }
}
