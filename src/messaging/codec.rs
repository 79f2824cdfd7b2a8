//! # Wire Codec
//!
//! Maps payload bytes to typed [`Frame`]s and back. Payloads are UTF-8 JSON
//! objects. Decoding checks the minimum required fields for the topic kind
//! before handing the object to serde, so a missing field is reported by
//! name instead of as a generic serde message.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use super::frames::{
    ConnectionFrame, FactsheetFrame, Frame, InstantActionFrame, OrderFrame, StateFrame,
};
use super::topics::{self, TopicKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed JSON payload: {message}")]
    MalformedJson { message: String },

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Topic does not carry a known frame kind: {topic}")]
    UnknownTopicKind { topic: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },
}

impl DecodeError {
    /// Short machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedJson { .. } => "malformed_json",
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::UnknownTopicKind { .. } => "unknown_topic_kind",
            Self::InvalidField { .. } => "invalid_field",
        }
    }

    /// Whether the payload was a well-formed object for a known kind but
    /// failed field validation. These are reported back as `validationError`.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingRequiredField { .. } | Self::InvalidField { .. }
        )
    }

    fn missing(field: &str) -> Self {
        Self::MissingRequiredField {
            field: field.to_string(),
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

const CONNECTION_FIELDS: &[&str] = &[
    "headerId",
    "timestamp",
    "version",
    "manufacturer",
    "serialNumber",
    "connectionState",
];
const ORDER_FIELDS: &[&str] = &["orderId", "timestamp", "action"];
const ORDER_ACTION_FIELDS: &[&str] = &["id", "command"];
const STATE_FIELDS: &[&str] = &[
    "headerId",
    "timestamp",
    "serialNumber",
    "orderId",
    "orderUpdateId",
    "actionState",
];
const INSTANT_ACTION_FIELDS: &[&str] = &["actions"];
const INSTANT_ACTION_ENTRY_FIELDS: &[&str] = &["actionType", "actionId"];
const FACTSHEET_FIELDS: &[&str] = &["serialNumber", "timestamp", "version"];

/// Serialize a frame to its JSON payload
pub fn encode(frame: &Frame) -> Result<Vec<u8>, serde_json::Error> {
    match frame {
        Frame::Connection(f) => serde_json::to_vec(f),
        Frame::State(f) => serde_json::to_vec(f),
        Frame::Order(f) => serde_json::to_vec(f),
        Frame::InstantAction(f) => serde_json::to_vec(f),
        Frame::Factsheet(f) => serde_json::to_vec(f),
    }
}

/// Decode a payload received on `topic`
pub fn decode(topic: &str, payload: &[u8]) -> Result<Frame, DecodeError> {
    let kind = topics::parse(topic)
        .and_then(|t| t.kind())
        .ok_or_else(|| DecodeError::UnknownTopicKind {
            topic: topic.to_string(),
        })?;
    decode_kind(kind, payload)
}

/// Decode a payload whose kind is already known
pub fn decode_kind(kind: TopicKind, payload: &[u8]) -> Result<Frame, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::MalformedJson {
            message: e.to_string(),
        })?;
    let object = value.as_object().ok_or_else(|| DecodeError::MalformedJson {
        message: "payload is not a JSON object".to_string(),
    })?;

    match kind {
        TopicKind::Connection => {
            require(object, CONNECTION_FIELDS, "")?;
            typed::<ConnectionFrame>(value).map(Frame::Connection)
        }
        TopicKind::Order => {
            require(object, ORDER_FIELDS, "")?;
            let action = object
                .get("action")
                .and_then(Value::as_object)
                .ok_or_else(|| DecodeError::invalid("action", "must be an object"))?;
            require(action, ORDER_ACTION_FIELDS, "action.")?;
            let frame = typed::<OrderFrame>(value)?;
            if frame.order_id.trim().is_empty() {
                return Err(DecodeError::invalid("orderId", "must not be empty"));
            }
            if frame.action.command.trim().is_empty() {
                return Err(DecodeError::invalid("action.command", "must not be empty"));
            }
            if frame.action.id.trim().is_empty() {
                return Err(DecodeError::invalid("action.id", "must not be empty"));
            }
            Ok(Frame::Order(frame))
        }
        TopicKind::State => {
            require(object, STATE_FIELDS, "")?;
            typed::<StateFrame>(value).map(Frame::State)
        }
        TopicKind::InstantAction => {
            require(object, INSTANT_ACTION_FIELDS, "")?;
            let actions = object
                .get("actions")
                .and_then(Value::as_array)
                .ok_or_else(|| DecodeError::invalid("actions", "must be an array"))?;
            for (index, entry) in actions.iter().enumerate() {
                let entry = entry.as_object().ok_or_else(|| {
                    DecodeError::invalid(&format!("actions[{index}]"), "must be an object")
                })?;
                require(entry, INSTANT_ACTION_ENTRY_FIELDS, &format!("actions[{index}]."))?;
            }
            typed::<InstantActionFrame>(value).map(Frame::InstantAction)
        }
        TopicKind::Factsheet => {
            require(object, FACTSHEET_FIELDS, "")?;
            typed::<FactsheetFrame>(value).map(Frame::Factsheet)
        }
    }
}

fn require(object: &Map<String, Value>, fields: &[&str], prefix: &str) -> Result<(), DecodeError> {
    match fields.iter().find(|field| !object.contains_key(**field)) {
        Some(field) => Err(DecodeError::missing(&format!("{prefix}{field}"))),
        None => Ok(()),
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidField {
        field: "payload".to_string(),
        message: e.to_string(),
    })
}
