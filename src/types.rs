//! Core types for the Dayline fusion pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw location samples, movement classifications, location blocks,
//! scheduled events, timeline events, and ingestion checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minutes in a civil day; all day-relative offsets live in `[0, 1440)`.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Timestamp as emitted by sample producers.
///
/// Platform shims are inconsistent: some send epoch milliseconds, some send
/// RFC3339 strings. Both deserialize transparently via the untagged repr.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleTime {
    /// Epoch milliseconds (UTC)
    Millis(i64),
    /// RFC3339 instant
    Instant(DateTime<Utc>),
}

impl SampleTime {
    /// Epoch milliseconds regardless of source representation
    pub fn as_millis(&self) -> i64 {
        match self {
            SampleTime::Millis(ms) => *ms,
            SampleTime::Instant(dt) => dt.timestamp_millis(),
        }
    }
}

impl From<DateTime<Utc>> for SampleTime {
    fn from(dt: DateTime<Utc>) -> Self {
        SampleTime::Instant(dt)
    }
}

impl From<i64> for SampleTime {
    fn from(ms: i64) -> Self {
        SampleTime::Millis(ms)
    }
}

/// A single raw location fix from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters; `None` means the fix is unrated
    pub accuracy_meters: Option<f64>,
    pub recorded_at: SampleTime,
}

/// Movement state inferred from a window of location samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Moving,
    Stationary,
}

/// Result of classifying a sample window.
///
/// `state` is `None` when the window is ambiguous or the data too thin;
/// ambiguity is reported, never guessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementClassification {
    pub state: Option<MovementState>,
    /// Confidence in the state, 0-1; zero when `state` is `None`
    pub confidence: f64,
    /// Drift-filtered path length over the window (meters)
    pub total_distance_meters: f64,
    /// Elapsed time between first and last usable sample (ms)
    pub time_span_ms: i64,
    /// Samples that survived the accuracy filter
    pub usable_sample_count: usize,
}

impl MovementClassification {
    /// Classification for a window with too few usable samples
    pub fn insufficient(usable_sample_count: usize) -> Self {
        Self {
            state: None,
            confidence: 0.0,
            total_distance_meters: 0.0,
            time_span_ms: 0,
            usable_sample_count,
        }
    }
}

/// A place inferred by the enrichment collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredPlace {
    pub name: String,
    /// Place category, e.g. "home", "gym", "restaurant"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Inference confidence, 0-1
    pub confidence: f64,
}

/// One contiguous usage session of a single app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSession {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: f64,
}

/// Per-app usage breakdown within an hour or a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUsage {
    pub app_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub sessions: Vec<AppSession>,
}

impl AppUsage {
    /// Total session minutes for this app
    pub fn total_minutes(&self) -> f64 {
        self.sessions.iter().map(|s| s.minutes).sum()
    }
}

/// Per-hour place/activity summary produced by the enrichment collaborator.
///
/// Summaries arrive chronologically ordered; the block grouper walks them in
/// order and never re-sorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlySummary {
    pub hour_start: DateTime<Utc>,
    /// Human-readable place label; "Unknown"/"Location" are placeholders
    pub place_label: String,
    /// Stable place identifier when the enrichment service resolved one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    /// Representative coordinate for proximity matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_place: Option<InferredPlace>,
    #[serde(default)]
    pub apps: Vec<AppUsage>,
    /// Free-text activity inference for the hour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    /// Movement state for the hour, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementState>,
}

/// Whether a block represents time at a place or time in transit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Stationary,
    Travel,
}

/// A contiguous real-world place/time segment inferred from location and
/// app-usage signals. Immutable once its window closes; rebuilt from scratch
/// if upstream data changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_place: Option<InferredPlace>,
    pub kind: BlockKind,
    pub apps: Vec<AppUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_inference: Option<String>,
    /// Duration-weighted average of constituent hours' inference confidence
    pub confidence: f64,
}

impl LocationBlock {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Category assigned to a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Routine,
    Health,
    Meal,
    Travel,
    Sleep,
    Work,
    Social,
    Unknown,
}

/// What kind of synthetic event the pipeline produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    /// Converted from a location block
    LocationBlock,
    /// Inserted to cover otherwise unaccounted time
    GapFill,
}

/// Event provenance metadata, tagged by source.
///
/// Each variant carries the narrow field set that source actually produces,
/// plus an `extra` bag preserving unknown fields for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventMeta {
    /// Entered by the user directly
    User {
        /// Back-reference from an "actual" event to its planned counterpart
        #[serde(skip_serializing_if = "Option::is_none")]
        planned_event_id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extra: HashMap<String, serde_json::Value>,
    },
    /// Synthesized by this pipeline
    Derived {
        kind: DerivedKind,
        confidence: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extra: HashMap<String, serde_json::Value>,
    },
    /// Backed by external evidence (e.g. imported trackers)
    Evidence {
        kind: String,
        confidence: f64,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extra: HashMap<String, serde_json::Value>,
    },
}

impl EventMeta {
    /// Plain user-entered metadata with no back-reference
    pub fn user() -> Self {
        EventMeta::User {
            planned_event_id: None,
            extra: HashMap::new(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, EventMeta::User { .. })
    }

    /// Derived or evidence events were synthesized, not entered by a user
    pub fn is_synthetic(&self) -> bool {
        !self.is_user()
    }

    /// Back-reference to a planned event, when present
    pub fn planned_ref(&self) -> Option<&str> {
        match self {
            EventMeta::User {
                planned_event_id, ..
            } => planned_event_id.as_deref(),
            _ => None,
        }
    }
}

/// A calendar-shaped event covering part of a single day.
///
/// Offsets are minutes from local midnight, clamped to `[0, 1440)`.
/// User-entered events always win over derived ones covering the same
/// interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_minutes: u32,
    pub duration_minutes: u32,
    pub category: EventCategory,
    pub meta: EventMeta,
}

impl ScheduledEvent {
    /// End offset in minutes, capped at end of day
    pub fn end_minutes(&self) -> u32 {
        (self.start_minutes + self.duration_minutes).min(MINUTES_PER_DAY)
    }

    /// Whether the half-open interval `[start, end)` covers `minute`
    pub fn contains_minute(&self, minute: u32) -> bool {
        minute >= self.start_minutes && minute < self.end_minutes()
    }

    /// Minutes of overlap with the half-open interval `[start, end)`
    pub fn overlap_minutes(&self, start: u32, end: u32) -> u32 {
        let lo = self.start_minutes.max(start);
        let hi = self.end_minutes().min(end);
        hi.saturating_sub(lo)
    }
}

/// Family a timeline event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    App,
    Email,
    Message,
    Call,
    Meeting,
    /// Planned event with no recorded counterpart
    Scheduled,
}

/// Final merged read-model entry for the daily timeline view.
///
/// Rebuilt on demand, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub kind: TimelineKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    /// Productivity hint from app categorization; `None` when not applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_productive: Option<bool>,
    pub is_past: bool,
    /// Ids of events whose intervals intersect this one (symmetric)
    #[serde(default)]
    pub overlaps: Vec<String>,
}

/// Per-run processing statistics, accumulated across windows.
///
/// Skipped/failed counts make partial degradation observable instead of
/// silently swallowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub sessions_processed: u32,
    pub segments_created: u32,
    pub events_built: u32,
    pub records_succeeded: u32,
    pub records_skipped: u32,
    pub records_failed: u32,
}

impl WindowStats {
    /// Fold another window's stats into this accumulator
    pub fn merge(&mut self, other: &WindowStats) {
        self.sessions_processed += other.sessions_processed;
        self.segments_created += other.segments_created;
        self.events_built += other.events_built;
        self.records_succeeded += other.records_succeeded;
        self.records_skipped += other.records_skipped;
        self.records_failed += other.records_failed;
    }
}

/// Persistent per-user ingestion cursor.
///
/// Single-writer; advanced only after a window fully succeeds, so a window is
/// never double-processed under normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionCheckpoint {
    pub user_id: String,
    /// IANA timezone name, carried through for presentation; offsets are
    /// resolved upstream
    pub timezone: String,
    /// Exclusive end of the last fully processed window
    pub last_window_end: DateTime<Utc>,
    pub stats: WindowStats,
}

/// Raw communication event row as stored by the communication collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationRow {
    /// Row type, e.g. "email", "message", "call", "meeting"
    pub row_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,
    pub title: String,
    /// Recipient/attendee/channel metadata and anything else the store keeps
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_time_accepts_both_representations() {
        let from_millis: SampleTime = serde_json::from_str("1705312800000").unwrap();
        assert_eq!(from_millis.as_millis(), 1_705_312_800_000);

        let from_iso: SampleTime = serde_json::from_str("\"2024-01-15T10:00:00Z\"").unwrap();
        assert_eq!(from_iso.as_millis(), 1_705_312_800_000);
    }

    #[test]
    fn test_event_meta_tagged_serialization() {
        let meta = EventMeta::Derived {
            kind: DerivedKind::GapFill,
            confidence: 0.3,
            block_id: None,
            extra: HashMap::new(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], "derived");
        assert_eq!(json["kind"], "gap_fill");

        let parsed: EventMeta = serde_json::from_value(json).unwrap();
        assert!(parsed.is_synthetic());
    }

    #[test]
    fn test_event_meta_preserves_unknown_fields() {
        let json = r#"{
            "source": "user",
            "planned_event_id": "plan-1",
            "extra": {"color": "blue"}
        }"#;
        let meta: EventMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.planned_ref(), Some("plan-1"));
        match meta {
            EventMeta::User { extra, .. } => assert_eq!(extra["color"], "blue"),
            _ => panic!("expected user meta"),
        }
    }

    #[test]
    fn test_scheduled_event_interval_math() {
        let event = ScheduledEvent {
            id: "e".into(),
            title: "Lunch".into(),
            description: None,
            start_minutes: 720,
            duration_minutes: 60,
            category: EventCategory::Meal,
            meta: EventMeta::user(),
        };

        assert_eq!(event.end_minutes(), 780);
        assert!(event.contains_minute(720));
        assert!(event.contains_minute(779));
        assert!(!event.contains_minute(780));
        assert_eq!(event.overlap_minutes(700, 750), 30);
        assert_eq!(event.overlap_minutes(0, 700), 0);
    }

    #[test]
    fn test_end_minutes_clamped_to_day() {
        let event = ScheduledEvent {
            id: "e".into(),
            title: "Late".into(),
            description: None,
            start_minutes: 1400,
            duration_minutes: 120,
            category: EventCategory::Unknown,
            meta: EventMeta::user(),
        };
        assert_eq!(event.end_minutes(), MINUTES_PER_DAY);
    }

    #[test]
    fn test_window_stats_merge() {
        let mut a = WindowStats {
            sessions_processed: 3,
            segments_created: 2,
            events_built: 10,
            records_succeeded: 12,
            records_skipped: 1,
            records_failed: 0,
        };
        let b = WindowStats {
            sessions_processed: 1,
            segments_created: 1,
            events_built: 4,
            records_succeeded: 5,
            records_skipped: 0,
            records_failed: 1,
        };
        a.merge(&b);
        assert_eq!(a.sessions_processed, 4);
        assert_eq!(a.segments_created, 3);
        assert_eq!(a.events_built, 14);
        assert_eq!(a.records_failed, 1);
    }
}
