//! # Transport Seam
//!
//! The module runtime and the CCU coordinator publish through
//! [`MqttTransport`] and receive [`SessionEvent`]s over an mpsc channel. The
//! production implementation is [`super::mqtt::MqttSession`];
//! [`RecordingTransport`] keeps every publish in memory for tests and for
//! dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::codec;
use super::errors::MessagingResult;
use super::frames::{ConnectionFrame, Frame, OrderFrame, StateFrame};
use super::topics::{self, TopicKind};

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QualityOfService> for rumqttc::QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QualityOfService,
    pub retain: bool,
}

impl OutboundMessage {
    /// Encode `frame` for `topic`
    pub fn frame(
        topic: impl Into<String>,
        frame: &Frame,
        qos: QualityOfService,
        retain: bool,
    ) -> MessagingResult<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: codec::encode(frame)?,
            qos,
            retain,
        })
    }

    /// Decode the payload back into a frame using the topic kind
    pub fn decode(&self) -> Option<Frame> {
        codec::decode(&self.topic, &self.payload).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Encode a frame as if it had arrived from the broker
    pub fn from_frame(topic: impl Into<String>, frame: &Frame) -> MessagingResult<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: codec::encode(frame)?,
        })
    }
}

/// What a session delivers to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// CONNACK received; (re)announce and (re)subscribe
    Connected,
    Message(InboundMessage),
    /// Connection lost; the session is reconnecting
    Disconnected { reason: String },
}

/// Publishing side of a broker session
#[async_trait]
pub trait MqttTransport: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> MessagingResult<()>;

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> MessagingResult<()>;

    /// Graceful disconnect after pending publishes are flushed
    async fn disconnect(&self) -> MessagingResult<()>;
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<OutboundMessage>,
    subscriptions: Vec<(String, QualityOfService)>,
    disconnected: bool,
}

/// In-memory transport that records every publish in order
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.inner.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<OutboundMessage> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QualityOfService)> {
        self.inner.lock().subscriptions.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().disconnected
    }

    pub fn clear(&self) {
        self.inner.lock().published.clear();
    }

    /// Every State frame published, in order
    pub fn state_frames(&self) -> Vec<StateFrame> {
        self.frames_of(TopicKind::State)
            .into_iter()
            .filter_map(|f| match f {
                Frame::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn connection_frames(&self) -> Vec<ConnectionFrame> {
        self.frames_of(TopicKind::Connection)
            .into_iter()
            .filter_map(|f| match f {
                Frame::Connection(conn) => Some(conn),
                _ => None,
            })
            .collect()
    }

    pub fn order_frames(&self) -> Vec<OrderFrame> {
        self.frames_of(TopicKind::Order)
            .into_iter()
            .filter_map(|f| match f {
                Frame::Order(order) => Some(order),
                _ => None,
            })
            .collect()
    }

    fn frames_of(&self, kind: TopicKind) -> Vec<Frame> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|m| topics::parse(&m.topic).and_then(|t| t.kind()) == Some(kind))
            .filter_map(OutboundMessage::decode)
            .collect()
    }
}

#[async_trait]
impl MqttTransport for RecordingTransport {
    async fn publish(&self, message: OutboundMessage) -> MessagingResult<()> {
        self.inner.lock().published.push(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> MessagingResult<()> {
        self.inner.lock().subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.inner.lock().disconnected = true;
        Ok(())
    }
}
