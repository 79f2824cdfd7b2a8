//! # Frame Structures
//!
//! Typed VDA5050-style payloads exchanged over MQTT. Field casing on the wire
//! is camelCase. Every frame keeps an `extra` map with fields it does not
//! model, so a decode-then-encode pass preserves them.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::clock::Timestamp;
use crate::constants::metadata_keys;
use crate::messaging::topics::TopicKind;
use crate::state_machine::ActionStatus;

/// Free-form key/value metadata
pub type Metadata = Map<String, Value>;

/// Liveness of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "CONNECTIONBROKEN")]
    ConnectionBroken,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
            Self::ConnectionBroken => write!(f, "CONNECTIONBROKEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFrame {
    pub header_id: u64,
    pub timestamp: Timestamp,
    pub version: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub connection_state: ConnectionState,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Severity of an [`ErrorRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorLevel {
    Warning,
    Fatal,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// One `{key: value}` entry of `errorReferences`
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReference {
    pub key: String,
    pub value: Value,
}

impl ErrorReference {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Serialize for ErrorReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ErrorReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::custom(format!(
                "error reference must hold exactly one entry, found {}",
                map.len()
            )));
        }
        let (key, value) = map
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("empty error reference"))?;
        Ok(Self { key, value })
    }
}

/// Protocol-level error surfaced in State frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error_type: String,
    pub error_level: ErrorLevel,
    #[serde(default)]
    pub error_references: Vec<ErrorReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorRecord {
    pub fn new(error_type: impl Into<String>, error_level: ErrorLevel) -> Self {
        Self {
            error_type: error_type.into(),
            error_level,
            error_references: Vec::new(),
            error_description: None,
        }
    }

    pub fn warning(error_type: impl Into<String>) -> Self {
        Self::new(error_type, ErrorLevel::Warning)
    }

    pub fn fatal(error_type: impl Into<String>) -> Self {
        Self::new(error_type, ErrorLevel::Fatal)
    }

    pub fn with_reference(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.error_references.push(ErrorReference::new(key, value));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.error_level == ErrorLevel::Fatal
    }

    /// Value of the first reference with `key`
    pub fn reference(&self, key: &str) -> Option<&Value> {
        self.error_references
            .iter()
            .find(|r| r.key == key)
            .map(|r| &r.value)
    }
}

/// Published progression of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub command: String,
    pub id: String,
    pub state: ActionStatus,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Workpiece held by a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    pub load_type: String,
    pub load_position: String,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl Load {
    pub fn new(load_type: impl Into<String>, load_position: impl Into<String>) -> Self {
        Self {
            load_type: load_type.into(),
            load_position: load_position.into(),
            extra: Metadata::new(),
        }
    }
}

/// Battery report of a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    pub percentage: f64,
    pub charging: bool,
    #[serde(flatten)]
    pub extra: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFrame {
    pub header_id: u64,
    pub timestamp: Timestamp,
    pub serial_number: String,
    /// Currently driving order, empty when none
    pub order_id: String,
    pub order_update_id: u64,
    #[serde(default)]
    pub paused: bool,
    pub action_state: Option<ActionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_state: Option<BatteryState>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub loads: Vec<Load>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl StateFrame {
    pub fn errors_of_type<'a>(&'a self, error_type: &'a str) -> impl Iterator<Item = &'a ErrorRecord> {
        self.errors.iter().filter(move |e| e.error_type == error_type)
    }
}

/// Priority hint carried in action metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// The single top-level action of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAction {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl OrderAction {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            metadata: Metadata::new(),
            extra: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn priority(&self) -> Option<Priority> {
        self.metadata
            .get(metadata_keys::PRIORITY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Advisory timeout in seconds
    pub fn timeout_secs(&self) -> Option<f64> {
        self.metadata
            .get(metadata_keys::TIMEOUT)
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
    }

    /// Workpiece colour or `TRANSPORT`
    pub fn workpiece_type(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::TYPE).and_then(Value::as_str)
    }

    pub fn workpiece_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::WORKPIECE_ID)
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFrame {
    pub order_id: String,
    #[serde(default)]
    pub order_update_id: u64,
    pub timestamp: Timestamp,
    pub action: OrderAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl OrderFrame {
    pub fn new(order_id: impl Into<String>, order_update_id: u64, action: OrderAction) -> Self {
        Self {
            order_id: order_id.into(),
            order_update_id,
            timestamp: Timestamp::now(),
            action,
            serial_number: None,
            extra: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantAction {
    pub action_type: String,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl InstantAction {
    pub fn new(action_type: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            action_id: action_id.into(),
            metadata: Metadata::new(),
            extra: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn metadata_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantActionFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    pub actions: Vec<InstantAction>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl InstantActionFrame {
    pub fn new(actions: Vec<InstantAction>) -> Self {
        Self {
            header_id: None,
            timestamp: Some(Timestamp::now()),
            serial_number: None,
            actions,
            extra: Metadata::new(),
        }
    }
}

/// Mostly static capability description; everything past the header is opaque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactsheetFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_id: Option<u64>,
    pub timestamp: Timestamp,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    pub serial_number: String,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Any frame of the protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Connection(ConnectionFrame),
    State(StateFrame),
    Order(OrderFrame),
    InstantAction(InstantActionFrame),
    Factsheet(FactsheetFrame),
}

impl Frame {
    pub fn kind(&self) -> TopicKind {
        match self {
            Self::Connection(_) => TopicKind::Connection,
            Self::State(_) => TopicKind::State,
            Self::Order(_) => TopicKind::Order,
            Self::InstantAction(_) => TopicKind::InstantAction,
            Self::Factsheet(_) => TopicKind::Factsheet,
        }
    }
}

impl From<ConnectionFrame> for Frame {
    fn from(frame: ConnectionFrame) -> Self {
        Self::Connection(frame)
    }
}

impl From<StateFrame> for Frame {
    fn from(frame: StateFrame) -> Self {
        Self::State(frame)
    }
}

impl From<OrderFrame> for Frame {
    fn from(frame: OrderFrame) -> Self {
        Self::Order(frame)
    }
}

impl From<InstantActionFrame> for Frame {
    fn from(frame: InstantActionFrame) -> Self {
        Self::InstantAction(frame)
    }
}

impl From<FactsheetFrame> for Frame {
    fn from(frame: FactsheetFrame) -> Self {
        Self::Factsheet(frame)
    }
}
