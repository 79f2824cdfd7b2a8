//! # Connection Lifecycle
//!
//! Liveness frames on a publisher's own `connection` topic and the reconnect
//! schedule used when the broker goes away.
//!
//! The Will (CONNECTIONBROKEN) is minted first so it takes the lowest
//! `headerId` of a session; ONLINE and OFFLINE follow. When a state directory
//! is available the last `headerId` handed out is persisted, so the first
//! frames after a restart still sort after everything published before.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::{SequenceCounters, Timestamp};
use crate::config::BackoffConfig;
use crate::messaging::errors::MessagingResult;
use crate::messaging::frames::{ConnectionFrame, ConnectionState, Frame, Metadata};
use crate::messaging::topics::{self, Role, TopicError, TopicKind};
use crate::messaging::transport::{OutboundMessage, QualityOfService};
use crate::persistence::JsonFileStore;

const SEQUENCE_DOCUMENT: &str = "connection_sequence";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSequence {
    last_header_id: u64,
}

/// Mints the connection frames of one publisher
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    serial: String,
    manufacturer: String,
    version: String,
    topic: String,
    store: Option<JsonFileStore>,
}

impl ConnectionLifecycle {
    pub fn new(
        role: Role,
        serial: impl Into<String>,
        manufacturer: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, TopicError> {
        let serial = serial.into();
        let topic = topics::topic(role, &serial, TopicKind::Connection)?;
        Ok(Self {
            serial,
            manufacturer: manufacturer.into(),
            version: version.into(),
            topic,
            store: None,
        })
    }

    /// Persist the connection sequence in `store`
    pub fn with_store(mut self, store: JsonFileStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Raise the connection counter above the persisted sequence, if any
    pub fn restore(&self, counters: &mut SequenceCounters) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load::<PersistedSequence>(SEQUENCE_DOCUMENT) {
            Ok(Some(persisted)) => {
                counters.raise_floor(TopicKind::Connection, persisted.last_header_id);
                tracing::debug!(
                    serial = %self.serial,
                    header_id = persisted.last_header_id,
                    "Restored connection sequence"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(serial = %self.serial, error = %e, "Ignoring unreadable connection sequence");
            }
        }
    }

    /// Build the next connection frame and record its `headerId`
    pub fn frame(&self, state: ConnectionState, counters: &mut SequenceCounters) -> ConnectionFrame {
        let header_id = counters.next(TopicKind::Connection);
        self.persist(header_id);
        ConnectionFrame {
            header_id,
            timestamp: Timestamp::now(),
            version: self.version.clone(),
            manufacturer: self.manufacturer.clone(),
            serial_number: self.serial.clone(),
            connection_state: state,
            extra: Metadata::new(),
        }
    }

    /// CONNECTIONBROKEN, for registration as the MQTT Will
    pub fn will_message(&self, counters: &mut SequenceCounters) -> MessagingResult<OutboundMessage> {
        self.message(ConnectionState::ConnectionBroken, counters)
    }

    pub fn online_message(&self, counters: &mut SequenceCounters) -> MessagingResult<OutboundMessage> {
        self.message(ConnectionState::Online, counters)
    }

    pub fn offline_message(&self, counters: &mut SequenceCounters) -> MessagingResult<OutboundMessage> {
        self.message(ConnectionState::Offline, counters)
    }

    fn message(
        &self,
        state: ConnectionState,
        counters: &mut SequenceCounters,
    ) -> MessagingResult<OutboundMessage> {
        let frame = self.frame(state, counters);
        tracing::info!(
            serial = %self.serial,
            state = %state,
            header_id = frame.header_id,
            "Connection frame minted"
        );
        OutboundMessage::frame(
            &self.topic,
            &Frame::Connection(frame),
            QualityOfService::AtLeastOnce,
            true,
        )
    }

    fn persist(&self, header_id: u64) {
        if let Some(store) = &self.store {
            let document = PersistedSequence {
                last_header_id: header_id,
            };
            if let Err(e) = store.save(SEQUENCE_DOCUMENT, &document) {
                tracing::warn!(serial = %self.serial, error = %e, "Failed to persist connection sequence");
            }
        }
    }
}

/// Bounded exponential reconnect schedule with jitter
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_enabled: bool,
    jitter_max_percentage: f64,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_enabled: config.jitter_enabled,
            jitter_max_percentage: config.jitter_max_percentage,
            max_attempts: config.max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based) is past the cap
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    /// Delay before `attempt` (1-based) without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before `attempt` with up to `jitter_max_percentage` added
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter_enabled && self.jitter_max_percentage > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_max_percentage);
            delay.mul_f64(1.0 + jitter).min(self.max_delay)
        } else {
            delay
        }
    }
}
