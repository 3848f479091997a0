//! Conversation store: intents, the pure reducer, and the owner of the shared collection.
//!
//! `apply` never mutates its input; it returns the next collection. `ConversationStore`
//! is the only place the collection changes: each intent is applied under the watch
//! channel's write lock, so intents are atomic and serialised. Readers get a
//! `watch::Receiver`, which cannot mutate.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::conversation::{Conversation, ConversationId, Message, Step};

/// A single state transition for the conversation collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Prepend a new conversation and make it the only active one.
    Added(Conversation),
    Deleted(ConversationId),
    /// Shallow-merge the present fields into the matching conversation.
    Updated(ConversationPatch),
    /// Replace the matching conversation wholesale and make it the only active one.
    /// No-op when the collection does not hold it.
    Selected(Conversation),
    MoveToFirst(ConversationId),
    /// Replace the whole collection; the first entry becomes active.
    ReplaceAll(Vec<Conversation>),
    MessageAdded {
        conversation: ConversationId,
        message: Message,
    },
    MessageAppended {
        conversation: ConversationId,
        delta: MessageDelta,
    },
    /// Attach steps to a message that has none yet; later steps for it are ignored.
    StepsAdded {
        conversation: ConversationId,
        message_id: String,
        steps: Vec<Step>,
    },
}

/// Content to append to a streamed message. `id` names the stream's message when the server sent one.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDelta {
    pub id: Option<String>,
    pub content: String,
}

/// Partial conversation for `Intent::Updated`; `None` fields are left as they are.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationPatch {
    pub id: ConversationId,
    /// `Some(None)` clears the title.
    pub title: Option<Option<String>>,
    pub messages: Option<Vec<Message>>,
}

impl ConversationPatch {
    pub fn title(id: impl Into<ConversationId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Some(Some(title.into())),
            messages: None,
        }
    }
}

impl From<Conversation> for ConversationPatch {
    /// Title and messages of a fetched conversation detail, a null title included; the
    /// active flag is not carried.
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            title: Some(c.title),
            messages: Some(c.messages),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Added,
    Deleted,
    Updated,
    Selected,
    MoveToFirst,
    ReplaceAll,
    MessageAdded,
    MessageAppended,
    StepsAdded,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Added => "added",
            IntentKind::Deleted => "deleted",
            IntentKind::Updated => "updated",
            IntentKind::Selected => "selected",
            IntentKind::MoveToFirst => "moveToFirst",
            IntentKind::ReplaceAll => "replaceAll",
            IntentKind::MessageAdded => "messageAdded",
            IntentKind::MessageAppended => "messageAppended",
            IntentKind::StepsAdded => "stepsAdded",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "added" => IntentKind::Added,
            "deleted" => IntentKind::Deleted,
            "updated" => IntentKind::Updated,
            "selected" => IntentKind::Selected,
            "moveToFirst" => IntentKind::MoveToFirst,
            "replaceAll" => IntentKind::ReplaceAll,
            "messageAdded" => IntentKind::MessageAdded,
            "messageAppended" => IntentKind::MessageAppended,
            "stepsAdded" => IntentKind::StepsAdded,
            other => return Err(StoreError::UnknownIntent(other.to_string())),
        })
    }
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Added(_) => IntentKind::Added,
            Intent::Deleted(_) => IntentKind::Deleted,
            Intent::Updated(_) => IntentKind::Updated,
            Intent::Selected(_) => IntentKind::Selected,
            Intent::MoveToFirst(_) => IntentKind::MoveToFirst,
            Intent::ReplaceAll(_) => IntentKind::ReplaceAll,
            Intent::MessageAdded { .. } => IntentKind::MessageAdded,
            Intent::MessageAppended { .. } => IntentKind::MessageAppended,
            Intent::StepsAdded { .. } => IntentKind::StepsAdded,
        }
    }
}

/// Store failures. Both variants are programmer or protocol errors, not recoverable conditions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A stream delta arrived for a conversation with no message to append to.
    #[error("no open message to append to in conversation {conversation}")]
    NoOpenMessage { conversation: ConversationId },
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
}

fn with_messages(c: &Conversation, messages: Vec<Message>) -> Conversation {
    Conversation {
        messages,
        ..c.clone()
    }
}

fn with_active(c: &Conversation, active: bool) -> Conversation {
    Conversation {
        active,
        ..c.clone()
    }
}

/// Apply one intent to a collection and return the next collection.
pub fn apply(conversations: &[Conversation], intent: Intent) -> Result<Vec<Conversation>, StoreError> {
    let next = match intent {
        Intent::Added(conversation) => {
            let first = Conversation {
                messages: Vec::new(),
                active: true,
                ..conversation
            };
            std::iter::once(first)
                .chain(conversations.iter().map(|c| with_active(c, false)))
                .collect()
        }
        Intent::Deleted(id) => conversations.iter().filter(|c| c.id != id).cloned().collect(),
        Intent::Updated(patch) => conversations
            .iter()
            .map(|c| {
                if c.id != patch.id {
                    return c.clone();
                }
                Conversation {
                    id: c.id.clone(),
                    title: patch.title.clone().unwrap_or_else(|| c.title.clone()),
                    messages: patch.messages.clone().unwrap_or_else(|| c.messages.clone()),
                    active: c.active,
                }
            })
            .collect(),
        Intent::Selected(selected) => {
            if !conversations.iter().any(|c| c.id == selected.id) {
                return Ok(conversations.to_vec());
            }
            conversations
                .iter()
                .map(|c| {
                    if c.id == selected.id {
                        Conversation {
                            active: true,
                            ..selected.clone()
                        }
                    } else {
                        with_active(c, false)
                    }
                })
                .collect()
        }
        Intent::MoveToFirst(id) => {
            let Some(found) = conversations.iter().find(|c| c.id == id) else {
                return Ok(conversations.to_vec());
            };
            std::iter::once(found.clone())
                .chain(conversations.iter().filter(|c| c.id != id).cloned())
                .collect()
        }
        Intent::ReplaceAll(list) => list
            .into_iter()
            .enumerate()
            .map(|(i, c)| Conversation { active: i == 0, ..c })
            .collect(),
        Intent::MessageAdded {
            conversation,
            message,
        } => conversations
            .iter()
            .map(|c| {
                if c.id != conversation {
                    return c.clone();
                }
                let mut messages = c.messages.clone();
                messages.push(message.clone());
                with_messages(c, messages)
            })
            .collect(),
        Intent::MessageAppended {
            conversation,
            delta,
        } => {
            let mut next = Vec::with_capacity(conversations.len());
            for c in conversations {
                if c.id != conversation {
                    next.push(c.clone());
                    continue;
                }
                let target = stream_target(&c.messages, delta.id.as_deref()).ok_or_else(|| {
                    StoreError::NoOpenMessage {
                        conversation: conversation.clone(),
                    }
                })?;
                let mut messages = c.messages.clone();
                messages[target].content.push_str(&delta.content);
                next.push(with_messages(c, messages));
            }
            next
        }
        Intent::StepsAdded {
            conversation,
            message_id,
            steps,
        } => conversations
            .iter()
            .map(|c| {
                if c.id != conversation {
                    return c.clone();
                }
                let messages = c
                    .messages
                    .iter()
                    .map(|m| {
                        if m.id.as_deref() == Some(message_id.as_str())
                            && m.intermediate_steps.is_none()
                        {
                            Message {
                                intermediate_steps: Some(steps.clone()),
                                ..m.clone()
                            }
                        } else {
                            m.clone()
                        }
                    })
                    .collect();
                with_messages(c, messages)
            })
            .collect(),
    };
    Ok(next)
}

/// Index of the message a stream delta belongs to: the latest message carrying the delta's id,
/// or the latest message when the delta has no id or its message is not present locally.
fn stream_target(messages: &[Message], id: Option<&str>) -> Option<usize> {
    let last = messages.len().checked_sub(1)?;
    let Some(id) = id else { return Some(last) };
    match messages.iter().rposition(|m| m.id.as_deref() == Some(id)) {
        Some(i) => Some(i),
        None => {
            log::debug!("stream message {} not found locally, appending to latest message", id);
            Some(last)
        }
    }
}

/// Owner of the conversation collection. Share it behind an `Arc`.
pub struct ConversationStore {
    tx: watch::Sender<Vec<Conversation>>,
    closed: AtomicBool,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Apply an intent. After `close`, intents are ignored.
    pub fn dispatch(&self, intent: Intent) -> Result<(), StoreError> {
        if self.is_closed() {
            log::debug!("store closed, ignoring {} intent", intent.kind());
            return Ok(());
        }
        let kind = intent.kind();
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| match apply(state, intent) {
            Ok(next) => {
                *state = next;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        if let Err(ref e) = outcome {
            log::error!("{} intent rejected: {}", kind, e);
        }
        outcome
    }

    /// Read-only view that is notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Conversation>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.tx.borrow().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
