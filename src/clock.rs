//! # Clock and Identifiers
//!
//! Wall-clock timestamps and sequence numbers for outbound frames.
//!
//! Timestamps are produced once per frame at emit time and rendered as
//! ISO-8601 UTC with millisecond precision and a trailing `Z`. They are not
//! used for ordering: two frames emitted in the same millisecond carry the
//! same timestamp. Ordering between frames of one publisher is established by
//! `headerId`, which [`SequenceCounters`] hands out per topic kind.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::messaging::topics::TopicKind;

/// A UTC instant with millisecond wire precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time truncated to milliseconds
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap an existing instant, dropping sub-millisecond precision
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        let millis = value.timestamp_millis();
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or(value),
        )
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Parse an ISO-8601 timestamp.
    ///
    /// Accepts RFC 3339 with any offset, and naive timestamps without an
    /// offset (interpreted as UTC) since some publishers omit the `Z`.
    pub fn parse(input: &str) -> Result<Self, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self::from_datetime(parsed.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Self::from_datetime(Utc.from_utc_datetime(&naive)))
            .map_err(|e| format!("Invalid timestamp '{input}': {e}"))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Mint a random identifier for an order or action
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-publisher `headerId` counters, one sequence per topic kind.
///
/// Sequences start at 1. A floor can be applied when a publisher resumes
/// after a restart so the next value stays above anything it published
/// before.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    last: HashMap<TopicKind, u64>,
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next header id for `kind`
    pub fn next(&mut self, kind: TopicKind) -> u64 {
        let entry = self.last.entry(kind).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Last header id handed out for `kind`, 0 if none
    pub fn current(&self, kind: TopicKind) -> u64 {
        self.last.get(&kind).copied().unwrap_or(0)
    }

    /// Guarantee the next value for `kind` is strictly greater than `floor`
    pub fn raise_floor(&mut self, kind: TopicKind, floor: u64) {
        let entry = self.last.entry(kind).or_insert(0);
        if *entry < floor {
            *entry = floor;
        }
    }
}
