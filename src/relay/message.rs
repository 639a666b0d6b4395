//! Transport-neutral inbound events and outbound button payloads.

use serde::{Deserialize, Serialize};

use crate::relay::database::Profile;

/// Who sent an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Sender {
    pub fn new(id: i64) -> Self {
        Self { id, username: None, first_name: None, last_name: None }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// The earlier message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    pub message_id: i64,
    pub text: String,
}

/// A text message received from the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// `None` for service messages without a resolvable sender.
    pub sender: Option<Sender>,
    pub text: String,
    pub reply_to: Option<ReplyRef>,
}

impl InboundMessage {
    pub fn text(sender: Sender, text: impl Into<String>) -> Self {
        Self { sender: Some(sender), text: text.into(), reply_to: None }
    }

    pub fn reply(sender: Sender, text: impl Into<String>, reply_to: ReplyRef) -> Self {
        Self { sender: Some(sender), text: text.into(), reply_to: Some(reply_to) }
    }
}

/// What an inline button does when pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Mark the feedback item processed.
    Process,
    /// Ban the author of the feedback item.
    Ban,
    /// Inert button shown after an action completed.
    Disabled,
}

/// Structured payload carried by an inline button.
///
/// Serialized as compact JSON, e.g. `{"a":"process","id":12}`, which stays
/// well under Telegram's 64-byte callback data limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAction {
    #[serde(rename = "a")]
    pub kind: ActionKind,
    pub id: i64,
}

impl CallbackAction {
    pub fn new(kind: ActionKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn encode(&self) -> String {
        // Two plain fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

/// An inline button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, kind: ActionKind, id: i64) -> Self {
        Self { label: label.into(), action: CallbackAction::new(kind, id) }
    }
}
