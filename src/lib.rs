#![allow(clippy::doc_markdown)] // Allow technical terms like VDA5050, MQTT in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # APS Core
//!
//! Module coordination core for the Agile Production System, a modular
//! factory whose stations talk a VDA5050-derived protocol over MQTT.
//!
//! ## Overview
//!
//! Every station (HBW, MILL, DRILL, AIQS, DPS, OVEN) and the FTS transport is
//! hosted by a [`module::ModuleRuntime`]. The runtime accepts orders from the
//! CCU, runs their actions one at a time on its hardware, and reports every
//! transition as a State frame. The CCU side ([`orchestration`]) strings
//! orders into workflows that drive a module step by step on one `orderId`.
//!
//! ## Module Organization
//!
//! - [`messaging`] - topics, typed frames, JSON codec, transport seam, MQTT session
//! - [`module`] - order book, hardware seam, instant actions, calibration, runtime
//! - [`state_machine`] - action states and the module IDLE / PROCESSING / RESET cycle
//! - [`connection`] - ONLINE / OFFLINE / Will frames and reconnect backoff
//! - [`orchestration`] - CCU workflow manager and coordinator
//! - [`config`] - layered configuration
//! - [`persistence`] - per-module JSON state directory
//! - [`logging`] - structured logging bootstrap
//! - [`error`] - crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aps_core::messaging::{RecordingTransport, SessionEvent};
//! use aps_core::module::{ModuleKind, RuntimeBootstrap, RuntimeSettings, SimulatedHardware};
//!
//! # async fn example() -> aps_core::Result<()> {
//! let bootstrap = RuntimeBootstrap::prepare(RuntimeSettings::new("SVR3QA0022", ModuleKind::Mill))?;
//! let transport = RecordingTransport::new();
//! let hardware = Arc::new(SimulatedHardware::new(ModuleKind::Mill));
//! let mut runtime = bootstrap.into_runtime(transport.clone(), hardware)?;
//!
//! runtime.handle_event(SessionEvent::Connected).await?;
//! println!("published {} frames", transport.published().len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod clock;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod module;
pub mod orchestration;
pub mod persistence;
pub mod state_machine;

pub use config::{ApsConfig, ConfigManager, ConfigurationError};
pub use error::{ApsError, Result};
pub use messaging::{Frame, MqttTransport, OutboundMessage, SessionEvent};
pub use module::{ModuleKind, ModuleRuntime, RuntimeBootstrap, RuntimeSettings};
pub use orchestration::{CcuCoordinator, WorkflowOrderManager};
