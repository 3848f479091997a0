//! `ChatClient`: the consumer-facing surface of the synchronization engine.
//!
//! Wires the connection manager, frame decoder, translator, store, and signals together
//! and exposes user actions. Frames and user actions both end up as intents on the same
//! store; each is applied atomically, in the order its source produced it.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::ConversationApi;
use crate::bootstrap;
use crate::config::{self, Config};
use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionState, ReconnectPolicy};
use crate::conversation::{conversation_by_id, current_conversation, Conversation, ConversationId, Message};
use crate::error::SyncError;
use crate::protocol::decode;
use crate::signals::{Notification, Signals};
use crate::store::{apply, ConversationPatch, ConversationStore, Intent, StoreError};
use crate::translate::{translate, Translation};

/// What the client needs besides the CRUD boundary.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Streaming endpoint, e.g. "ws://127.0.0.1:8000/api/chat".
    pub chat_url: String,
    pub policy: ReconnectPolicy,
    /// When unset, the service's userinfo (or a guest name) is used.
    pub username: Option<String>,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_url: config::chat_ws_url(&config::resolve_origin(config), &config.server.chat_path),
            policy: config.reconnect.policy(),
            username: config::resolve_username(config),
        }
    }
}

pub struct ChatClient {
    store: Arc<ConversationStore>,
    signals: Arc<Signals>,
    connection: ConnectionHandle,
    api: Arc<dyn ConversationApi>,
    username: String,
    pump: Mutex<Option<JoinHandle<Result<(), StoreError>>>>,
}

impl ChatClient {
    /// Resolve the username and start the streaming connection. Call [`ChatClient::bootstrap`]
    /// to load conversations.
    pub async fn start(options: ClientOptions, api: Arc<dyn ConversationApi>) -> Self {
        let username = bootstrap::resolve_username(options.username, api.as_ref()).await;
        log::info!("starting chat client as {}", username);

        let store = Arc::new(ConversationStore::new());
        let signals = Arc::new(Signals::new());
        let (frames_tx, frames_rx) = ConnectionManager::frame_channel();
        let (connection, _task) =
            ConnectionManager::new(options.chat_url, options.policy, signals.clone()).spawn(frames_tx);
        let pump = tokio::spawn(pump_frames(
            frames_rx,
            store.clone(),
            signals.clone(),
            connection.clone(),
        ));

        Self {
            store,
            signals,
            connection,
            api,
            username,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Load conversations from the service and activate the first one.
    pub async fn bootstrap(&self) -> Result<ConversationId, SyncError> {
        bootstrap::bootstrap(self.api.as_ref(), &self.store).await.map_err(|e| {
            self.fail(format!("Loading chats failed: {}", e));
            e
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Read-only view of the conversation collection.
    pub fn conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.store.snapshot()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        current_conversation(&self.store.snapshot()).cloned()
    }

    pub fn dispatch(&self, intent: Intent) -> Result<(), StoreError> {
        self.store.dispatch(intent)
    }

    pub fn thought(&self) -> watch::Receiver<String> {
        self.signals.thought()
    }

    pub fn thought_open(&self) -> watch::Receiver<bool> {
        self.signals.thought_open()
    }

    pub fn close_thought(&self) {
        self.signals.close_thought();
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.signals.notifications()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    /// Send `content` to the active conversation and show it locally once it left the client.
    pub fn send(&self, content: &str) -> Result<(), SyncError> {
        let Some(active) = self.active_conversation() else {
            self.fail("No active chat to send to");
            return Err(SyncError::NoActiveConversation);
        };
        if let Err(e) = self.connection.send(&active.id, content, &self.username) {
            self.fail(format!("Message not sent: {}", e));
            return Err(e.into());
        }
        self.store.dispatch(Intent::MessageAdded {
            conversation: active.id.clone(),
            message: Message::new(None, self.username.clone(), content),
        })?;
        self.store.dispatch(Intent::MoveToFirst(active.id))?;
        Ok(())
    }

    /// Make `id` the active conversation with its full message detail. Only conversations
    /// held locally can be selected.
    pub async fn select(&self, id: &str) -> Result<(), SyncError> {
        let snapshot = self.store.snapshot();
        match conversation_by_id(&snapshot, id) {
            Some(c) if c.active => return Ok(()),
            Some(_) => {}
            None => {
                self.fail("Chat not found");
                return Err(SyncError::UnknownConversation(id.to_string()));
            }
        }
        let detail = self.api.get_conversation(id).await.map_err(|e| {
            self.fail(format!("Loading chat failed: {}", e));
            e
        })?;
        self.store.dispatch(Intent::Selected(detail))?;
        Ok(())
    }

    /// Create a conversation on the service and make it active.
    pub async fn new_conversation(&self) -> Result<ConversationId, SyncError> {
        let created = self.api.create_conversation().await.map_err(|e| {
            self.fail(format!("Create chat failed: {}", e));
            e
        })?;
        let id = created.id.clone();
        self.store.dispatch(Intent::Added(created))?;
        Ok(id)
    }

    /// Rename on the service; the local title changes only after the service accepted it.
    pub async fn rename(&self, id: &str, title: &str) -> Result<(), SyncError> {
        if let Err(e) = self.api.update_conversation(id, title).await {
            log::warn!("rename of {} failed: {}", id, e);
            self.fail("Update chat failed");
            return Err(e.into());
        }
        self.store.dispatch(Intent::Updated(ConversationPatch::title(id, title)))?;
        self.signals.notify(Notification::success("Update chat success"));
        Ok(())
    }

    /// Delete on the service, then locally. Keeps one conversation active: a fresh one is
    /// created when the last is deleted, and the first remaining one is selected when the
    /// active one is deleted.
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        if let Err(e) = self.api.delete_conversation(id).await {
            log::warn!("delete of {} failed: {}", id, e);
            self.fail("Delete chat failed");
            return Err(e.into());
        }
        let current = self.store.snapshot();
        let was_active = conversation_by_id(&current, id).is_some_and(|c| c.active);
        let remaining = apply(&current, Intent::Deleted(id.to_string()))?;

        if remaining.is_empty() {
            // the replacement must exist before the last conversation leaves
            let created = self.api.create_conversation().await.map_err(|e| {
                self.fail(format!("Create chat failed: {}", e));
                e
            })?;
            self.store.dispatch(Intent::Deleted(id.to_string()))?;
            self.store.dispatch(Intent::Added(created))?;
        } else if was_active {
            let next = &remaining[0];
            let selected = match self.api.get_conversation(&next.id).await {
                Ok(detail) => detail,
                Err(e) => {
                    log::warn!("loading {} after delete failed: {}", next.id, e);
                    next.clone()
                }
            };
            // select first so there is never a moment without an active conversation
            self.store.dispatch(Intent::Selected(selected))?;
            self.store.dispatch(Intent::Deleted(id.to_string()))?;
        } else {
            self.store.dispatch(Intent::Deleted(id.to_string()))?;
        }
        self.signals.notify(Notification::success("Chat deleted"));
        Ok(())
    }

    /// Close the connection, cancel reconnection, and stop applying intents. Idempotent.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        self.store.close();
    }

    /// Wait for the frame pump to end: after shutdown, or with the protocol violation that
    /// stopped the client.
    pub async fn finished(&self) -> Result<(), StoreError> {
        let pump = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take();
        match pump {
            Some(handle) => match handle.await {
                Ok(res) => res,
                Err(e) => {
                    log::error!("frame pump panicked: {}", e);
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }

    fn fail(&self, message: impl Into<String>) {
        self.signals.notify(Notification::error(message));
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decode, translate, and apply inbound frames in arrival order. A store error means client and
/// server disagree about the stream; the client stops instead of showing corrupted state.
async fn pump_frames(
    mut frames: mpsc::Receiver<String>,
    store: Arc<ConversationStore>,
    signals: Arc<Signals>,
    connection: ConnectionHandle,
) -> Result<(), StoreError> {
    while let Some(text) = frames.recv().await {
        let frame = match decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("dropping frame: {}", e);
                continue;
            }
        };
        log::trace!("frame {}", frame.kind());
        match translate(frame) {
            Translation::Intent(intent) => {
                if let Err(e) = store.dispatch(intent) {
                    log::error!("stream out of sync, stopping client: {}", e);
                    signals.notify(Notification::error(format!("Chat stopped: {}", e)));
                    connection.shutdown();
                    store.close();
                    return Err(e);
                }
            }
            Translation::Signal(signal) => signals.apply(signal),
        }
    }
    Ok(())
}
