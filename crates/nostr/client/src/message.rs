//! Relay protocol frames (NIP-01).
//!
//! - Client to relay: `EVENT`, `REQ`, `CLOSE`
//! - Relay to client: `EVENT`, `OK`, `EOSE`, `CLOSED`, `NOTICE`

use nostr::{Event, Filter};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Event),

    /// `["REQ", <subscription_id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// `["CLOSE", <subscription_id>]`
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription_id>, <event>]`
    Event {
        subscription_id: String,
        event: Event,
    },

    /// `["OK", <event_id>, <true|false>, <message>]`
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// `["EOSE", <subscription_id>]`
    Eose { subscription_id: String },

    /// `["CLOSED", <subscription_id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },

    /// `["NOTICE", <message>]`
    Notice { message: String },
}

fn str_at<'a>(frame: &'a [Value], idx: usize, field: &'static str) -> Result<&'a str, MessageError> {
    frame
        .get(idx)
        .ok_or(MessageError::MissingField(field))?
        .as_str()
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

impl RelayMessage {
    /// Parse a text frame. Unknown message types are an error the caller is
    /// expected to log and skip.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        let kind = frame
            .first()
            .ok_or_else(|| MessageError::InvalidFormat("empty array".to_string()))?
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))?;

        match kind {
            "EVENT" => {
                let subscription_id = str_at(&frame, 1, "subscription_id")?.to_string();
                let raw = frame.get(2).ok_or(MessageError::MissingField("event"))?;
                let event: Event = serde_json::from_value(raw.clone())?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = str_at(&frame, 1, "event_id")?.to_string();
                let success = frame
                    .get(2)
                    .ok_or(MessageError::MissingField("success"))?
                    .as_bool()
                    .ok_or_else(|| MessageError::InvalidFormat("success not a boolean".to_string()))?;
                let message = frame.get(3).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(&frame, 1, "subscription_id")?.to_string(),
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(&frame, 1, "subscription_id")?.to_string(),
                message: frame.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(&frame, 1, "message")?.to_string(),
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}
