//! Chat session controller
//!
//! A [`ChatSession`] owns the [`Conversation`] for the lifetime of one session
//! and is the only thing that ever mutates it:
//! 1. UI commands arrive through a [`SessionHandle`]
//! 2. Each queued reply is requested in its own task
//! 3. Finished requests are reconciled back on the session task
//! 4. Every change is published as a snapshot for the UI to render
//!
//! Dropping the session (shutdown, or every handle gone) aborts outstanding
//! requests; their placeholders vanish with the conversation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{Id as TaskId, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use crate::conversation::{Conversation, PendingReply, Turn, TurnId};
use crate::providers::{CompletionError, CompletionService};

use super::memory::{ConversationStore, StoreError};

const COMMAND_BUFFER: usize = 64;

/// Errors surfaced to the UI layer
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Ids of a user turn and the placeholder waiting for its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Queued {
    pub turn: TurnId,
    pub placeholder: TurnId,
}

impl From<&PendingReply> for Queued {
    fn from(pending: &PendingReply) -> Self {
        Self {
            turn: pending.turn,
            placeholder: pending.placeholder,
        }
    }
}

enum Command {
    Append {
        text: String,
        reply: oneshot::Sender<Option<Queued>>,
    },
    Edit {
        target: TurnId,
        text: String,
        reply: oneshot::Sender<Option<Queued>>,
    },
    Delete {
        target: TurnId,
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    ClearHistory {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Save {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

type Completion = (TurnId, Result<String, CompletionError>);

pub struct ChatSession {
    conversation: Conversation,
    completion: Arc<dyn CompletionService>,
    store: Arc<dyn ConversationStore>,
    commands: mpsc::Receiver<Command>,
    updates: watch::Sender<Vec<Turn>>,
    in_flight: JoinSet<Completion>,
    /// Placeholder owned by each running request, for tasks that die early
    placeholders: HashMap<TaskId, TurnId>,
}

impl ChatSession {
    /// Load the stored conversation and spawn the session task
    pub async fn start(
        completion: Arc<dyn CompletionService>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<SessionHandle, StoreError> {
        let mut conversation = Conversation::from_turns(store.load().await?);

        let orphans = conversation.settle_orphans();
        if orphans > 0 {
            tracing::warn!(orphans, "stored conversation had unanswered placeholders");
        }
        tracing::info!(turns = conversation.len(), "session started");

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (updates, snapshots) = watch::channel(conversation.turns().to_vec());

        let session = Self {
            conversation,
            completion,
            store,
            commands: command_rx,
            updates,
            in_flight: JoinSet::new(),
            placeholders: HashMap::new(),
        };
        tokio::spawn(session.run());

        Ok(SessionHandle {
            commands: command_tx,
            snapshots,
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        if let Err(e) = self.persist().await {
                            tracing::error!(error = %e, "failed to save conversation on teardown");
                        }
                        break;
                    }
                },
                Some(joined) = self.in_flight.join_next_with_id(), if !self.in_flight.is_empty() => {
                    self.settle(joined);
                }
            }
        }

        tracing::info!(abandoned = self.in_flight.len(), "session ended");
    }

    /// Apply one UI command. Returns `false` once the session should end.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Append { text, reply } => {
                let queued = self.conversation.append(&text).map(|p| self.queue(p));
                let _ = reply.send(queued);
            }
            Command::Edit {
                target,
                text,
                reply,
            } => {
                let queued = self.conversation.edit(target, &text).map(|p| self.queue(p));
                let _ = reply.send(queued);
            }
            Command::Delete { target, reply } => {
                let removed = self.conversation.delete(target);
                if removed {
                    self.publish();
                }
                let _ = reply.send(removed);
            }
            Command::Clear { reply } => {
                self.conversation.clear();
                self.publish();
                let _ = reply.send(());
            }
            Command::ClearHistory { reply } => {
                self.conversation.clear();
                self.publish();
                let _ = reply.send(self.store.clear().await);
            }
            Command::Save { reply } => {
                let _ = reply.send(self.persist().await);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.persist().await);
                return false;
            }
        }
        true
    }

    fn settle(&mut self, joined: Result<(TaskId, Completion), tokio::task::JoinError>) {
        let (placeholder, outcome) = match joined {
            Ok((task, completion)) => {
                self.placeholders.remove(&task);
                completion
            }
            Err(e) => {
                tracing::error!(error = %e, "completion task did not finish");
                let Some(placeholder) = self.placeholders.remove(&e.id()) else {
                    return;
                };
                let failure = CompletionError::TaskFailed(e.to_string());
                (placeholder, Err(failure))
            }
        };

        self.conversation.reconcile(placeholder, outcome);
        self.publish();
    }

    /// Start the completion request for a freshly inserted placeholder
    fn queue(&mut self, pending: PendingReply) -> Queued {
        let queued = Queued::from(&pending);
        let completion = Arc::clone(&self.completion);
        let span = tracing::info_span!(
            "completion",
            request_id = %Uuid::new_v4(),
            placeholder = %pending.placeholder,
        );

        let task = self.in_flight.spawn(
            async move {
                let outcome = completion
                    .complete(&pending.history, &pending.message)
                    .await;
                match &outcome {
                    Ok(text) => tracing::debug!(chars = text.len(), "reply received"),
                    Err(e) => tracing::warn!(error = %e, "completion failed"),
                }
                (pending.placeholder, outcome)
            }
            .instrument(span),
        );
        self.placeholders.insert(task.id(), queued.placeholder);

        self.publish();
        queued
    }

    async fn persist(&self) -> Result<(), StoreError> {
        self.store.save(self.conversation.turns()).await
    }

    fn publish(&self) {
        self.updates.send_replace(self.conversation.turns().to_vec());
    }
}

/// Cloneable entry point used by the UI layer
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Vec<Turn>>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Send a message. `None` when the text is blank.
    pub async fn append(&self, text: impl Into<String>) -> Result<Option<Queued>, SessionError> {
        let text = text.into();
        self.request(|reply| Command::Append { text, reply }).await
    }

    /// Feed a speech recognition result in as if it had been typed
    pub async fn voice_input(
        &self,
        recognized: Option<String>,
    ) -> Result<Option<Queued>, SessionError> {
        match recognized {
            Some(text) => self.append(text).await,
            None => Ok(None),
        }
    }

    /// Rewrite a user turn and request a new reply. `None` when the turn is gone.
    pub async fn edit(
        &self,
        target: TurnId,
        text: impl Into<String>,
    ) -> Result<Option<Queued>, SessionError> {
        let text = text.into();
        self.request(|reply| Command::Edit {
            target,
            text,
            reply,
        })
        .await
    }

    pub async fn delete(&self, target: TurnId) -> Result<bool, SessionError> {
        self.request(|reply| Command::Delete { target, reply }).await
    }

    /// Empty the in-memory conversation; the stored copy is left alone
    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Empty both the in-memory conversation and the stored copy
    pub async fn clear_history(&self) -> Result<(), SessionError> {
        Ok(self.request(|reply| Command::ClearHistory { reply }).await??)
    }

    /// Persist the conversation now, e.g. when the app goes to the background
    pub async fn save(&self) -> Result<(), SessionError> {
        Ok(self.request(|reply| Command::Save { reply }).await??)
    }

    /// Save and end the session. Outstanding requests are abandoned.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        Ok(self.request(|reply| Command::Shutdown { reply }).await??)
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Turn>> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, Role, TurnStatus, ERROR_TEXT, PLACEHOLDER_TEXT};
    use crate::core::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio_test::assert_ok;

    /// Echoes the message back, optionally failing, once a permit is available
    struct FakeService {
        gate: Arc<Semaphore>,
        fail: bool,
        calls: Mutex<Vec<(Vec<Message>, String)>>,
    }

    impl FakeService {
        fn open() -> Arc<Self> {
            Self::build(Semaphore::MAX_PERMITS, false)
        }

        fn gated() -> Arc<Self> {
            Self::build(0, false)
        }

        fn failing_gated() -> Arc<Self> {
            Self::build(0, true)
        }

        fn build(permits: usize, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::new(Semaphore::new(permits)),
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }

        fn calls(&self) -> Vec<(Vec<Message>, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for FakeService {
        async fn complete(
            &self,
            history: &[Message],
            message: &str,
        ) -> Result<String, CompletionError> {
            self.calls
                .lock()
                .unwrap()
                .push((history.to_vec(), message.to_string()));
            self.gate.acquire().await.unwrap().forget();
            if self.fail {
                Err(CompletionError::InvalidResponse("unavailable".into()))
            } else {
                Ok(format!("echo: {}", message))
            }
        }
    }

    async fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new_in_memory().await.unwrap())
    }

    fn texts(turns: &[Turn]) -> Vec<(Role, String)> {
        turns.iter().map(|t| (t.role, t.content.clone())).collect()
    }

    /// Wait until no placeholder is left
    async fn settled(handle: &SessionHandle) -> Vec<Turn> {
        let mut updates = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let turns = updates.borrow_and_update();
                    if !turns.iter().any(Turn::is_placeholder) {
                        return turns.clone();
                    }
                }
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("replies did not settle")
    }

    #[tokio::test]
    async fn test_append_reconciles_reply() {
        let service = FakeService::gated();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        let queued = handle.append("hi").await.unwrap().unwrap();
        let turns = handle.snapshot();
        assert_eq!(
            texts(&turns),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, PLACEHOLDER_TEXT.to_string())
            ]
        );
        assert_eq!(turns[0].id, queued.turn);
        assert_eq!(turns[1].id, queued.placeholder);

        service.release();
        let turns = settled(&handle).await;
        assert_eq!(
            texts(&turns),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, "echo: hi".to_string())
            ]
        );
        assert_eq!(service.calls(), vec![(vec![], "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_blank_append_is_ignored() {
        let service = FakeService::open();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        assert_eq!(handle.append("   ").await.unwrap(), None);
        assert_eq!(handle.voice_input(None).await.unwrap(), None);
        assert!(handle.snapshot().is_empty());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_voice_input_is_appended() {
        let handle = ChatSession::start(FakeService::open(), store().await).await.unwrap();

        assert!(handle
            .voice_input(Some("what time is it".into()))
            .await
            .unwrap()
            .is_some());
        let turns = settled(&handle).await;
        assert_eq!(turns[1].content, "echo: what time is it");
    }

    #[tokio::test]
    async fn test_failure_becomes_error_turn() {
        let service = FakeService::failing_gated();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        handle.append("hi").await.unwrap();
        service.release();
        let turns = settled(&handle).await;

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, ERROR_TEXT);
        assert_eq!(turns[1].status, TurnStatus::Failed);
    }

    #[tokio::test]
    async fn test_edit_requests_fresh_reply() {
        let service = FakeService::gated();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        let queued = handle.append("hi").await.unwrap().unwrap();
        service.release();
        settled(&handle).await;

        let edited = handle.edit(queued.turn, "bye").await.unwrap().unwrap();
        assert_eq!(edited.turn, queued.turn);
        assert_eq!(
            texts(&handle.snapshot()),
            vec![
                (Role::User, "bye".to_string()),
                (Role::Assistant, PLACEHOLDER_TEXT.to_string())
            ]
        );

        service.release();
        let turns = settled(&handle).await;
        assert_eq!(turns[1].content, "echo: bye");
        assert_eq!(turns[1].id, edited.placeholder);

        // the stale reply is not part of the new request
        assert_eq!(service.calls()[1], (vec![], "bye".to_string()));
    }

    #[tokio::test]
    async fn test_edit_and_delete_unknown_turn() {
        let handle = ChatSession::start(FakeService::open(), store().await).await.unwrap();
        handle.append("hi").await.unwrap();
        let before = texts(&settled(&handle).await);

        assert_eq!(handle.edit(TurnId(42), "x").await.unwrap(), None);
        assert!(!handle.delete(TurnId(42)).await.unwrap());
        assert_eq!(texts(&handle.snapshot()), before);
    }

    #[tokio::test]
    async fn test_late_reply_after_delete_is_appended_as_error() {
        let service = FakeService::gated();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        let queued = handle.append("hi").await.unwrap().unwrap();
        assert!(handle.delete(queued.turn).await.unwrap());
        assert!(handle.snapshot().is_empty());

        let mut updates = handle.subscribe();
        updates.borrow_and_update();
        service.release();
        updates.changed().await.unwrap();

        let turns = handle.snapshot();
        assert_eq!(texts(&turns), vec![(Role::Assistant, ERROR_TEXT.to_string())]);
        assert_eq!(turns[0].status, TurnStatus::Failed);
    }

    /// Panics instead of answering
    struct PanickingService;

    #[async_trait]
    impl CompletionService for PanickingService {
        async fn complete(&self, _: &[Message], _: &str) -> Result<String, CompletionError> {
            panic!("backend blew up");
        }
    }

    #[tokio::test]
    async fn test_panicked_request_becomes_error_turn() {
        let handle = ChatSession::start(Arc::new(PanickingService), store().await)
            .await
            .unwrap();

        let queued = handle.append("hi").await.unwrap().unwrap();
        let turns = settled(&handle).await;

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].id, queued.placeholder);
        assert_eq!(turns[1].content, ERROR_TEXT);
        assert_eq!(turns[1].status, TurnStatus::Failed);

        // the session keeps working afterwards
        assert!(handle.append("again").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_late_failure_after_delete_is_appended() {
        let service = FakeService::failing_gated();
        let handle = ChatSession::start(service.clone(), store().await).await.unwrap();

        let queued = handle.append("hi").await.unwrap().unwrap();
        handle.delete(queued.turn).await.unwrap();

        let mut updates = handle.subscribe();
        updates.borrow_and_update();
        service.release();
        updates.changed().await.unwrap();
        assert_eq!(
            texts(&handle.snapshot()),
            vec![(Role::Assistant, ERROR_TEXT.to_string())]
        );
    }

    #[tokio::test]
    async fn test_session_round_trips_through_store() {
        let store = store().await;

        let handle = ChatSession::start(FakeService::open(), store.clone()).await.unwrap();
        handle.append("remember this").await.unwrap();
        let before = texts(&settled(&handle).await);
        assert_ok!(handle.shutdown().await);

        let handle = ChatSession::start(FakeService::open(), store.clone()).await.unwrap();
        assert_eq!(texts(&handle.snapshot()), before);

        assert_ok!(handle.clear_history().await);
        assert!(handle.snapshot().is_empty());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_stored_copy() {
        let store = store().await;
        let handle = ChatSession::start(FakeService::open(), store.clone()).await.unwrap();

        handle.append("keep me on disk").await.unwrap();
        settled(&handle).await;
        assert_ok!(handle.save().await);

        handle.clear().await.unwrap();
        assert!(handle.snapshot().is_empty());
        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_orphaned_placeholder_is_settled_on_start() {
        let store = store().await;

        let handle = ChatSession::start(FakeService::gated(), store.clone()).await.unwrap();
        handle.append("never answered").await.unwrap();
        assert_ok!(handle.shutdown().await);
        assert_eq!(store.load().await.unwrap()[1].status, TurnStatus::Pending);

        let handle = ChatSession::start(FakeService::open(), store).await.unwrap();
        let turns = handle.snapshot();
        assert_eq!(turns[1].content, ERROR_TEXT);
        assert_eq!(turns[1].status, TurnStatus::Failed);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_session() {
        let handle = ChatSession::start(FakeService::open(), store().await).await.unwrap();
        let other = handle.clone();
        handle.shutdown().await.unwrap();

        assert!(matches!(other.append("hello?").await, Err(SessionError::Closed)));
    }
}
