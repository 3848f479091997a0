//! One-shot startup: resolve the username and load the initial conversations.

use crate::api::ConversationApi;
use crate::conversation::ConversationId;
use crate::error::SyncError;
use crate::store::{ConversationStore, Intent};

/// Username for outbound messages: the configured one, else the service's userinfo,
/// else a generated guest name.
pub async fn resolve_username(configured: Option<String>, api: &dyn ConversationApi) -> String {
    if let Some(name) = configured.filter(|n| !n.trim().is_empty()) {
        return name;
    }
    match api.user_info().await {
        Ok(Some(name)) => name,
        Ok(None) => fallback_username(),
        Err(e) => {
            log::warn!("userinfo lookup failed, using a guest name: {}", e);
            fallback_username()
        }
    }
}

fn fallback_username() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("guest-{}", &id[..8])
}

/// Load the conversation list into `store` and give the first one its full message detail.
///
/// Creates a conversation when the service has none. Afterwards exactly one conversation is
/// active and holds its messages; the others hold summaries until selected. Returns the id of
/// the active conversation.
pub async fn bootstrap(
    api: &dyn ConversationApi,
    store: &ConversationStore,
) -> Result<ConversationId, SyncError> {
    let conversations = api.list_conversations().await?;
    let first = match conversations.first() {
        Some(first) => {
            let id = first.id.clone();
            log::debug!("loaded {} conversations", conversations.len());
            store.dispatch(Intent::ReplaceAll(conversations))?;
            id
        }
        None => {
            log::info!("no conversations, creating a new one");
            let created = api.create_conversation().await?;
            let id = created.id.clone();
            store.dispatch(Intent::Added(created))?;
            id
        }
    };
    let detail = api.get_conversation(&first).await?;
    store.dispatch(Intent::Updated(detail.into()))?;
    Ok(first)
}
