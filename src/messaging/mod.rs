//! # Messaging Module
//!
//! Everything between the broker and the module/CCU logic: topic naming,
//! typed frames, the JSON codec, the transport seam and the `rumqttc`
//! session.

pub mod codec;
pub mod errors;
pub mod frames;
pub mod mqtt;
pub mod topics;
pub mod transport;

pub use codec::{decode, decode_kind, encode, DecodeError};
pub use errors::{MessagingError, MessagingResult};
pub use frames::{
    ActionState, BatteryState, ConnectionFrame, ConnectionState, ErrorLevel, ErrorRecord,
    FactsheetFrame, Frame, InstantAction, InstantActionFrame, Load, OrderAction, OrderFrame,
    StateFrame,
};
pub use mqtt::{MqttSession, SessionPump};
pub use topics::{CcuTopic, Role, Topic, TopicError, TopicKind};
pub use transport::{
    InboundMessage, MqttTransport, OutboundMessage, QualityOfService, RecordingTransport,
    SessionEvent,
};
