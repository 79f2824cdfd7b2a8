//! Module kinds and the commands each of them executes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::messaging::topics::Role;

/// Kind of station hosted by a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleKind {
    /// High-bay warehouse
    Hbw,
    Mill,
    Drill,
    /// Quality check with camera
    Aiqs,
    /// Delivery and pickup station
    Dps,
    Oven,
    /// Driverless transport vehicle
    Fts,
}

/// Where in the PICK → PROCESS → DROP pattern a command sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStage {
    Pick,
    Process,
    Drop,
}

impl CommandStage {
    pub fn of(command: &str) -> Self {
        match command {
            "PICK" => Self::Pick,
            "DROP" => Self::Drop,
            _ => Self::Process,
        }
    }
}

pub const CHECK_QUALITY: &str = "CHECK_QUALITY";
pub const RESULT_PASSED: &str = "PASSED";
pub const RESULT_FAILED: &str = "FAILED";

const HBW_COMMANDS: &[&str] = &["PICK", "DROP"];
const MILL_COMMANDS: &[&str] = &["PICK", "MILL", "DROP"];
const DRILL_COMMANDS: &[&str] = &["PICK", "DRILL", "DROP"];
const AIQS_COMMANDS: &[&str] = &["PICK", CHECK_QUALITY, "DROP"];
const DPS_COMMANDS: &[&str] = &["PICK", "DROP"];
const OVEN_COMMANDS: &[&str] = &["PICK", "FIRE", "DROP"];
const FTS_COMMANDS: &[&str] = &["DOCK", "UNDOCK", "PASS", "TURN", "CHARGE"];

/// High-bay warehouse storage slots
pub const HBW_SLOTS: &[&str] = &["A1", "A2", "A3", "B1", "B2", "B3", "C1", "C2", "C3"];

const HBW_POSITIONS: &[&str] = &[
    "HOME", "CONVEYOR", "A1", "A2", "A3", "B1", "B2", "B3", "C1", "C2", "C3",
];
const PROCESSING_POSITIONS: &[&str] = &["HOME", "PICKUP", "PROCESS", "DROPOFF"];
const AIQS_POSITIONS: &[&str] = &["HOME", "PICKUP", "CAMERA", "OK", "NOK"];
const DPS_POSITIONS: &[&str] = &["HOME", "INPUT", "OUTPUT", "CAMERA", "NFC"];
const FTS_POSITIONS: &[&str] = &["DOCK"];

impl ModuleKind {
    pub fn all() -> [ModuleKind; 7] {
        [
            Self::Hbw,
            Self::Mill,
            Self::Drill,
            Self::Aiqs,
            Self::Dps,
            Self::Oven,
            Self::Fts,
        ]
    }

    /// Namespace the kind publishes under
    pub fn role(&self) -> Role {
        match self {
            Self::Fts => Role::Transport,
            _ => Role::Module,
        }
    }

    pub fn supported_commands(&self) -> &'static [&'static str] {
        match self {
            Self::Hbw => HBW_COMMANDS,
            Self::Mill => MILL_COMMANDS,
            Self::Drill => DRILL_COMMANDS,
            Self::Aiqs => AIQS_COMMANDS,
            Self::Dps => DPS_COMMANDS,
            Self::Oven => OVEN_COMMANDS,
            Self::Fts => FTS_COMMANDS,
        }
    }

    pub fn supports(&self, command: &str) -> bool {
        self.supported_commands().contains(&command)
    }

    /// Fixed set of reference positions shared by every module of this kind
    pub fn calibration_positions(&self) -> &'static [&'static str] {
        match self {
            Self::Hbw => HBW_POSITIONS,
            Self::Mill | Self::Drill | Self::Oven => PROCESSING_POSITIONS,
            Self::Aiqs => AIQS_POSITIONS,
            Self::Dps => DPS_POSITIONS,
            Self::Fts => FTS_POSITIONS,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Fts)
    }

    pub fn stores_workpieces(&self) -> bool {
        matches!(self, Self::Hbw)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hbw => write!(f, "HBW"),
            Self::Mill => write!(f, "MILL"),
            Self::Drill => write!(f, "DRILL"),
            Self::Aiqs => write!(f, "AIQS"),
            Self::Dps => write!(f, "DPS"),
            Self::Oven => write!(f, "OVEN"),
            Self::Fts => write!(f, "FTS"),
        }
    }
}

impl std::str::FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HBW" => Ok(Self::Hbw),
            "MILL" => Ok(Self::Mill),
            "DRILL" => Ok(Self::Drill),
            "AIQS" => Ok(Self::Aiqs),
            "DPS" => Ok(Self::Dps),
            "OVEN" => Ok(Self::Oven),
            "FTS" => Ok(Self::Fts),
            _ => Err(format!("Invalid module kind: {s}")),
        }
    }
}
