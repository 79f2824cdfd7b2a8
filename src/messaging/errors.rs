//! # Messaging Error Types
//!
//! Errors of the broker-facing layer: connecting, publishing, subscribing and
//! encoding frames.

use thiserror::Error;

use super::topics::TopicError;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker unreachable after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Publish failed on {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe failed on {topic}: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Refusing to publish on foreign topic {topic} as {serial}")]
    ForeignTopic { topic: String, serial: String },

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Session closed")]
    SessionClosed,
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn foreign_topic(topic: impl Into<String>, serial: impl Into<String>) -> Self {
        Self::ForeignTopic {
            topic: topic.into(),
            serial: serial.into(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::message_serialization(err.to_string())
    }
}

impl From<rumqttc::ClientError> for MessagingError {
    fn from(err: rumqttc::ClientError) -> Self {
        MessagingError::connection(err.to_string())
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
