//! # Topic Namer
//!
//! Derives and classifies MQTT topic names.
//!
//! ```text
//! module/v1/ff/{serial}/{connection|state|order|instantAction|factsheet}
//! fts/v1/ff/{serial}/{connection|state|order|instantAction}
//! module/v1/ff/NodeRed/{serial}/{connection|state|factsheet}   (read-only mirror)
//! ccu/{order/request|order/active|order/completed|set/reset|set/charge|state/...|pairing/state}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MODULE_PREFIX: &str = "module/v1/ff";
pub const TRANSPORT_PREFIX: &str = "fts/v1/ff";
pub const CCU_PREFIX: &str = "ccu";
pub const NODE_RED_SEGMENT: &str = "NodeRed";

/// Publisher role, which selects the topic namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Module,
    Transport,
    Ccu,
    /// TXT controllers only appear as peers on the broker; they own no
    /// namespace in this protocol.
    TxtController,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Transport => write!(f, "transport"),
            Self::Ccu => write!(f, "ccu"),
            Self::TxtController => write!(f, "txt-controller"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Self::Module),
            "transport" | "fts" => Ok(Self::Transport),
            "ccu" => Ok(Self::Ccu),
            "txt-controller" => Ok(Self::TxtController),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

/// Last segment of a device topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    Connection,
    State,
    Order,
    InstantAction,
    Factsheet,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::State => "state",
            Self::Order => "order",
            Self::InstantAction => "instantAction",
            Self::Factsheet => "factsheet",
        }
    }

    /// Whether `role` publishes or consumes this kind at all
    pub fn valid_for(&self, role: Role) -> bool {
        match role {
            Role::Module => true,
            Role::Transport => !matches!(self, Self::Factsheet),
            Role::Ccu | Role::TxtController => false,
        }
    }

    /// Kinds a Node-RED mirror republishes
    fn mirrored(&self) -> bool {
        matches!(self, Self::Connection | Self::State | Self::Factsheet)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection" => Ok(Self::Connection),
            "state" => Ok(Self::State),
            "order" => Ok(Self::Order),
            "instantAction" => Ok(Self::InstantAction),
            "factsheet" => Ok(Self::Factsheet),
            _ => Err(format!("Invalid topic kind: {s}")),
        }
    }
}

/// Topics in the CCU namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CcuTopic {
    OrderRequest,
    OrderActive,
    OrderCompleted,
    SetReset,
    SetCharge,
    /// `ccu/state/{sub}`, e.g. `ccu/state/flows`
    State(String),
    PairingState,
}

impl CcuTopic {
    pub fn path(&self) -> String {
        match self {
            Self::OrderRequest => format!("{CCU_PREFIX}/order/request"),
            Self::OrderActive => format!("{CCU_PREFIX}/order/active"),
            Self::OrderCompleted => format!("{CCU_PREFIX}/order/completed"),
            Self::SetReset => format!("{CCU_PREFIX}/set/reset"),
            Self::SetCharge => format!("{CCU_PREFIX}/set/charge"),
            Self::State(sub) => format!("{CCU_PREFIX}/state/{sub}"),
            Self::PairingState => format!("{CCU_PREFIX}/pairing/state"),
        }
    }

    fn from_segments(segments: &[&str]) -> Option<Self> {
        match segments {
            ["order", "request"] => Some(Self::OrderRequest),
            ["order", "active"] => Some(Self::OrderActive),
            ["order", "completed"] => Some(Self::OrderCompleted),
            ["set", "reset"] => Some(Self::SetReset),
            ["set", "charge"] => Some(Self::SetCharge),
            ["pairing", "state"] => Some(Self::PairingState),
            ["state", rest @ ..] if !rest.is_empty() && rest.iter().all(|s| !s.is_empty()) => {
                Some(Self::State(rest.join("/")))
            }
            _ => None,
        }
    }
}

/// Where a device topic came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicOrigin {
    /// Published by the device itself
    Device,
    /// Enriched projection republished by the Node-RED orchestrator
    NodeRedMirror,
}

/// A classified topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Device {
        role: Role,
        serial: String,
        kind: TopicKind,
        origin: TopicOrigin,
    },
    Ccu(CcuTopic),
}

impl Topic {
    pub fn kind(&self) -> Option<TopicKind> {
        match self {
            Self::Device { kind, .. } => Some(*kind),
            Self::Ccu(_) => None,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::Device { serial, .. } => Some(serial),
            Self::Ccu(_) => None,
        }
    }

    pub fn is_mirror(&self) -> bool {
        matches!(
            self,
            Self::Device {
                origin: TopicOrigin::NodeRedMirror,
                ..
            }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic kind {kind} is not available for role {role}")]
    KindNotAvailable { role: Role, kind: TopicKind },

    #[error("Invalid serial number: {serial:?}")]
    InvalidSerial { serial: String },
}

/// Build the topic a `role` with `serial` uses for `kind`
pub fn topic(role: Role, serial: &str, kind: TopicKind) -> Result<String, TopicError> {
    if serial.is_empty() || serial.contains('/') || serial.contains('+') || serial.contains('#') {
        return Err(TopicError::InvalidSerial {
            serial: serial.to_string(),
        });
    }
    let prefix = match role {
        Role::Module if kind.valid_for(role) => MODULE_PREFIX,
        Role::Transport if kind.valid_for(role) => TRANSPORT_PREFIX,
        _ => return Err(TopicError::KindNotAvailable { role, kind }),
    };
    Ok(format!("{prefix}/{serial}/{kind}"))
}

/// Node-RED mirror topic for a module serial
pub fn mirror_topic(serial: &str, kind: TopicKind) -> Result<String, TopicError> {
    if !kind.mirrored() {
        return Err(TopicError::KindNotAvailable {
            role: Role::Module,
            kind,
        });
    }
    Ok(format!("{MODULE_PREFIX}/{NODE_RED_SEGMENT}/{serial}/{kind}"))
}

/// Classify a topic; `None` if it matches no known pattern
pub fn parse(topic: &str) -> Option<Topic> {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        ["module", "v1", "ff", NODE_RED_SEGMENT, serial, kind] => {
            let kind: TopicKind = kind.parse().ok()?;
            (!serial.is_empty() && kind.mirrored()).then(|| Topic::Device {
                role: Role::Module,
                serial: (*serial).to_string(),
                kind,
                origin: TopicOrigin::NodeRedMirror,
            })
        }
        ["module", "v1", "ff", serial, kind] => device(Role::Module, serial, kind),
        ["fts", "v1", "ff", serial, kind] => device(Role::Transport, serial, kind),
        [CCU_PREFIX, rest @ ..] => CcuTopic::from_segments(rest).map(Topic::Ccu),
        _ => None,
    }
}

fn device(role: Role, serial: &str, kind: &str) -> Option<Topic> {
    let kind: TopicKind = kind.parse().ok()?;
    if serial.is_empty() || !kind.valid_for(role) {
        return None;
    }
    Some(Topic::Device {
        role,
        serial: serial.to_string(),
        kind,
        origin: TopicOrigin::Device,
    })
}
