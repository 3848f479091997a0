//! Streaming channel wire protocol: inbound frame decoding and the outbound text frame.
//!
//! Every frame is a JSON object tagged by `type`. Message-bearing frames carry the
//! conversation id in `conversation` and the message id in `id`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conversation::{null_as_empty, ConversationId, Message, Step};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// A complete message.
    #[serde(rename = "text")]
    Text(MessageFrame),
    /// Opens a streamed message; later `stream/text` frames append to it.
    #[serde(rename = "stream/start")]
    StreamStart(MessageFrame),
    #[serde(rename = "stream/text")]
    StreamText(MessageFrame),
    #[serde(rename = "thought/start")]
    ThoughtStart(ThoughtFrame),
    #[serde(rename = "thought/text")]
    ThoughtText(ThoughtFrame),
    #[serde(rename = "info/intermediate-steps")]
    IntermediateSteps(StepsFrame),
    #[serde(rename = "error")]
    Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageFrame {
    #[serde(default)]
    pub id: Option<String>,
    pub conversation: ConversationId,
    #[serde(default)]
    pub from: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default)]
    pub intermediate_steps: Option<Vec<Step>>,
}

impl MessageFrame {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            from: self.from,
            content: self.content,
            intermediate_steps: self.intermediate_steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThoughtFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub conversation: Option<ConversationId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepsFrame {
    /// Id of the message the steps belong to.
    pub id: String,
    pub conversation: ConversationId,
    #[serde(default)]
    pub intermediate_steps: Option<Vec<Step>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub conversation: Option<ConversationId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    StreamStart,
    StreamText,
    ThoughtStart,
    ThoughtText,
    IntermediateSteps,
    Error,
}

impl FrameKind {
    pub const ALL: [FrameKind; 7] = [
        FrameKind::Text,
        FrameKind::StreamStart,
        FrameKind::StreamText,
        FrameKind::ThoughtStart,
        FrameKind::ThoughtText,
        FrameKind::IntermediateSteps,
        FrameKind::Error,
    ];

    /// Wire tag carried in the frame's `type` field.
    pub fn tag(self) -> &'static str {
        match self {
            FrameKind::Text => "text",
            FrameKind::StreamStart => "stream/start",
            FrameKind::StreamText => "stream/text",
            FrameKind::ThoughtStart => "thought/start",
            FrameKind::ThoughtText => "thought/text",
            FrameKind::IntermediateSteps => "info/intermediate-steps",
            FrameKind::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::StreamStart(_) => FrameKind::StreamStart,
            Frame::StreamText(_) => FrameKind::StreamText,
            Frame::ThoughtStart(_) => FrameKind::ThoughtStart,
            Frame::ThoughtText(_) => FrameKind::ThoughtText,
            Frame::IntermediateSteps(_) => FrameKind::IntermediateSteps,
            Frame::Error(_) => FrameKind::Error,
        }
    }
}

/// Why a frame was dropped. None of these are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no type tag")]
    MissingType,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

/// Decode one text frame. Failures are returned, never raised; callers log and drop them.
pub fn decode(text: &str) -> Result<Frame, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?;
    if FrameKind::from_tag(tag).is_none() {
        return Err(DecodeError::UnknownType(tag.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Outbound user message: `{ "type": "text", "conversation", "from", "content" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundText {
    #[serde(rename = "type")]
    pub typ: String,
    pub conversation: ConversationId,
    pub from: String,
    pub content: String,
}

impl OutboundText {
    pub fn new(
        conversation: impl Into<ConversationId>,
        from: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            typ: FrameKind::Text.tag().to_string(),
            conversation: conversation.into(),
            from: from.into(),
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
