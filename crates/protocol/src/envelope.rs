//! Decoding of MESSAGE bodies into application messages.
//!
//! The body is first parsed as a generic JSON object, then classified once
//! into the closed [`InboundMessage`] variant set. The backend uses `type` on
//! chat and read-receipt frames and `messageType` on notifications, so the
//! classifier reads `type` first and falls back to `messageType`.

use serde_json::Value;

use crate::constants::MessageKind;
use crate::messages::{CallBellRequest, ChatMessage, ReadReceiptNotification};

/// A MESSAGE body that is not valid JSON.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse message body: {0}")]
pub struct ParseFailure(#[from] serde_json::Error);

/// An inbound application message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Chat(ChatMessage),
    CallBell(CallBellRequest),
    ReadReceipt(ReadReceiptNotification),
    /// Valid JSON with an unrecognised discriminant, or a known discriminant
    /// whose fields do not fit the typed shape.
    Unknown(Value),
}

impl InboundMessage {
    /// Parses and classifies a MESSAGE body.
    pub fn decode(body: &str) -> Result<Self, ParseFailure> {
        let value: Value = serde_json::from_str(body)?;
        Ok(Self::classify(value))
    }

    /// Classifies an already-parsed body.
    pub fn classify(value: Value) -> Self {
        let Some(kind) = discriminant(&value).and_then(MessageKind::from_discriminant) else {
            return InboundMessage::Unknown(value);
        };

        let typed = match kind {
            MessageKind::Chat => serde_json::from_value(value.clone()).map(InboundMessage::Chat),
            MessageKind::CallBell => {
                serde_json::from_value(value.clone()).map(InboundMessage::CallBell)
            }
            MessageKind::ReadReceipt => {
                serde_json::from_value(value.clone()).map(InboundMessage::ReadReceipt)
            }
        };
        typed.unwrap_or(InboundMessage::Unknown(value))
    }

    /// Returns the recognised kind, or `None` for [`InboundMessage::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            InboundMessage::Chat(_) => Some(MessageKind::Chat),
            InboundMessage::CallBell(_) => Some(MessageKind::CallBell),
            InboundMessage::ReadReceipt(_) => Some(MessageKind::ReadReceipt),
            InboundMessage::Unknown(_) => None,
        }
    }
}

/// Reads the discriminant field, `type` taking precedence over `messageType`.
pub fn discriminant(value: &Value) -> Option<&str> {
    value
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| value.get("messageType").and_then(Value::as_str))
}
