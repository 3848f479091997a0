//! Conversations, messages, and agent steps as held by the conversation store.
//!
//! The same types deserialize from the CRUD boundary (conversation detail) and from
//! message-bearing stream frames, so they are lenient about nulls and legacy encodings.

use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned conversation identifier (opaque string).
pub type ConversationId = String;

/// One conversation: id, optional title, ordered messages, and whether it is the active one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub active: bool,
}

impl Conversation {
    /// A conversation with no messages, inactive.
    pub fn new(id: impl Into<ConversationId>, title: Option<String>) -> Self {
        Self {
            id: id.into(),
            title,
            messages: Vec::new(),
            active: false,
        }
    }
}

/// A single chat message. `content` grows while the message is being streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id; absent for messages created locally (e.g. the user's own outbound text).
    #[serde(default)]
    pub id: Option<String>,
    /// Participant identifier: the username or an agent id such as "ai".
    #[serde(default)]
    pub from: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_steps: Option<Vec<Step>>,
}

impl Message {
    pub fn new(id: Option<String>, from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            from: from.into(),
            content: content.into(),
            intermediate_steps: None,
        }
    }
}

/// One tool invocation by the backend agent and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub action: AgentAction,
    /// Plain text or structured JSON, as produced by the tool.
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub tool: String,
    /// Tool input; structured inputs are kept as their JSON text.
    #[serde(default, deserialize_with = "string_or_json")]
    pub tool_input: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub log: String,
}

/// Steps arrive either as `[action, result]` pairs or as `{action, result}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepRepr {
    Pair(AgentAction, serde_json::Value),
    Object {
        action: AgentAction,
        #[serde(default)]
        result: serde_json::Value,
    },
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match StepRepr::deserialize(deserializer)? {
            StepRepr::Pair(action, result) => Step { action, result },
            StepRepr::Object { action, result } => Step { action, result },
        })
    }
}

pub(crate) fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// The active conversation, if any.
pub fn current_conversation(conversations: &[Conversation]) -> Option<&Conversation> {
    conversations.iter().find(|c| c.active)
}

pub fn conversation_by_id<'a>(conversations: &'a [Conversation], id: &str) -> Option<&'a Conversation> {
    conversations.iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_null_content_and_extra_fields() {
        let m: Message = serde_json::from_str(
            r#"{"id":"m1","conversation":"c1","from":"ai","content":null,"type":"stream/start"}"#,
        )
        .unwrap();
        assert_eq!(m.id.as_deref(), Some("m1"));
        assert_eq!(m.from, "ai");
        assert_eq!(m.content, "");
        assert!(m.intermediate_steps.is_none());
    }

    #[test]
    fn steps_accept_pairs_and_objects() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[
                [{"tool":"sql_db_query","tool_input":"SELECT 1","log":"Action: query","type":"AgentAction"}, "1"],
                {"action":{"tool":"sql_db_schema","tool_input":{"table":"users"},"log":null},"result":{"rows":3}}
            ]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action.tool, "sql_db_query");
        assert_eq!(steps[0].result, serde_json::json!("1"));
        assert_eq!(steps[1].action.tool_input, r#"{"table":"users"}"#);
        assert_eq!(steps[1].action.log, "");
        assert_eq!(steps[1].result["rows"], 3);
    }

    #[test]
    fn conversation_detail_defaults() {
        let c: Conversation = serde_json::from_str(
            r#"{"id":"c1","title":"New chat","owner":"alice","created_at":"2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(c, Conversation::new("c1", Some("New chat".to_string())));
    }

    #[test]
    fn selectors() {
        let mut a = Conversation::new("a", None);
        let b = Conversation::new("b", None);
        a.active = true;
        let list = vec![b, a];
        assert_eq!(current_conversation(&list).map(|c| c.id.as_str()), Some("a"));
        assert!(conversation_by_id(&list, "b").is_some());
        assert!(conversation_by_id(&list, "zz").is_none());
        assert!(current_conversation(&[]).is_none());
    }
}
