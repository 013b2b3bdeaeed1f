//! In-memory conversation shown to the user.
//!
//! Only the session controller mutates it. Every mutation is announced on a
//! broadcast channel so a presentation layer can redraw incrementally.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use vibe_shared::schemas::ConversationRecord;
use vibe_shared::{Message, Role};

use crate::assembler::StreamOutcome;

const EVENT_BUFFER: usize = 256;

/// Change notification for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    ConversationStarted(String),
    MessagePushed(usize),
    PartAppended { message: usize, part: usize },
    PartUpdated { message: usize, part: usize },
    StreamFinished { message: usize, outcome: StreamOutcome },
    /// Messages were cleared or replaced wholesale.
    Reset,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    conversation_id: Option<String>,
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True while the last assistant message is still receiving events.
    pub fn is_streaming(&self) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.is_streaming)
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// The id is fixed once assigned. Returns whether this call assigned it.
    fn assign_conversation_id(&mut self, id: String) -> bool {
        if self.conversation_id.is_some() {
            return false;
        }
        self.conversation_id = Some(id);
        true
    }
}

/// Shared handle to the conversation state plus its change feed.
#[derive(Clone)]
pub struct ConversationView {
    state: Arc<Mutex<ConversationState>>,
    events: broadcast::Sender<ViewEvent>,
}

impl Default for ConversationView {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationView {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(Mutex::new(ConversationState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state.lock().conversation_id.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().is_streaming()
    }

    pub(crate) fn lock(&self) -> ViewGuard<'_> {
        ViewGuard {
            state: self.state.lock(),
            events: &self.events,
        }
    }

    /// Drop all messages and forget the conversation id.
    pub fn clear(&self) {
        let mut guard = self.lock();
        guard.state.conversation_id = None;
        guard.state.messages.clear();
        guard.publish(ViewEvent::Reset);
    }

    /// Replace the view with a conversation loaded from the server.
    /// Stored messages only carry plain content.
    pub fn load(&self, record: &ConversationRecord) {
        let messages = record
            .messages
            .iter()
            .map(|stored| {
                Message::new(
                    new_message_id(),
                    stored.role,
                    stored.content.clone(),
                    stored.timestamp.clone(),
                )
            })
            .collect();

        let mut guard = self.lock();
        guard.state.conversation_id = Some(record.id.clone());
        guard.state.messages = messages;
        guard.publish(ViewEvent::Reset);
    }
}

/// Exclusive access to the state. Events published through it are sent while
/// the lock is held, so subscribers observe them in mutation order.
pub(crate) struct ViewGuard<'a> {
    pub(crate) state: MutexGuard<'a, ConversationState>,
    events: &'a broadcast::Sender<ViewEvent>,
}

impl ViewGuard<'_> {
    pub(crate) fn publish(&self, event: ViewEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn push(&mut self, message: Message) -> usize {
        let index = self.state.push(message);
        self.publish(ViewEvent::MessagePushed(index));
        index
    }

    pub(crate) fn assign_conversation_id(&mut self, id: String) {
        if self.state.assign_conversation_id(id.clone()) {
            self.publish(ViewEvent::ConversationStarted(id));
        }
    }
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}
