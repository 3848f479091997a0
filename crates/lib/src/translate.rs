//! Maps decoded frames to store intents or transient signals.

use crate::protocol::Frame;
use crate::signals::Signal;
use crate::store::{Intent, MessageDelta};

/// What a frame does: change the conversation collection, or only transient UI state.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Intent(Intent),
    Signal(Signal),
}

pub fn translate(frame: Frame) -> Translation {
    match frame {
        Frame::Text(f) | Frame::StreamStart(f) => {
            let conversation = f.conversation.clone();
            Translation::Intent(Intent::MessageAdded {
                conversation,
                message: f.into_message(),
            })
        }
        Frame::StreamText(f) => Translation::Intent(Intent::MessageAppended {
            conversation: f.conversation,
            delta: MessageDelta {
                id: f.id,
                content: f.content,
            },
        }),
        Frame::ThoughtStart(_) => Translation::Signal(Signal::ThoughtStarted),
        Frame::ThoughtText(f) => Translation::Signal(Signal::ThoughtText(f.content)),
        Frame::IntermediateSteps(f) => Translation::Intent(Intent::StepsAdded {
            conversation: f.conversation,
            message_id: f.id,
            steps: f.intermediate_steps.unwrap_or_default(),
        }),
        Frame::Error(f) => Translation::Signal(Signal::Error(f.content)),
    }
}
