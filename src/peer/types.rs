use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the exchange a payload carries
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Offer,
    Answer,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Offer => "offer",
            PayloadKind::Answer => "answer",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description as produced by the transport. The coordinator only
/// stores and forwards it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct Description(pub serde_json::Value);

impl Description {
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// Payload exchanged out-of-band through a QR code or URL
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NegotiationPayload {
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    #[serde(rename = "username")]
    pub display_name: String,
    #[serde(rename = "sdp")]
    pub description: Description,
    /// ms since epoch, informational only
    #[serde(rename = "timestamp")]
    pub created_at: i64,
}

impl NegotiationPayload {
    pub fn new(kind: PayloadKind, display_name: &str, description: Description) -> Self {
        Self {
            kind,
            display_name: display_name.to_string(),
            description,
            created_at: crate::utils::now_millis(),
        }
    }
}

/// A chat line as the user sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub body: String,
    pub sent_at: i64,
}

/// Tag kept next to each transcript entry; never sent over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub direction: Direction,
    pub message: ChatMessage,
}

/// Frame carried on the data channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub r#type: String, // always "message" for chat lines
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

pub const CHAT_MESSAGE_TYPE: &str = "message";

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            r#type: CHAT_MESSAGE_TYPE.into(),
            username: msg.sender.clone(),
            message: msg.body.clone(),
            timestamp: msg.sent_at,
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        Self {
            sender: wire.username,
            body: wire.message,
            sent_at: wire.timestamp,
        }
    }
}
