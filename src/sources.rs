//! External source interfaces
//!
//! This module defines the async seams to the collaborators the pipeline
//! consumes but does not implement: location samples, hourly enrichment
//! summaries, communication rows, calendar events, and the per-user
//! checkpoint store. In-memory implementations back the test suite and serve
//! as reference for real integrations.

use crate::error::FusionError;
use crate::pipeline::DayArtifacts;
use crate::types::{
    CommunicationRow, HourlySummary, IngestionCheckpoint, LocationSample, ScheduledEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Yields raw location sample batches per user and time range
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn samples(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>, FusionError>;
}

/// Per-hour place/activity summaries from the enrichment collaborator.
///
/// Implementations may cache place inference (typically for 14 days);
/// `invalidate` is the manual-refresh hook that drops that cache.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn hourly_summaries(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlySummary>, FusionError>;

    async fn invalidate(&self, _user_id: &str) {}
}

/// Communication event rows for a user and time range
#[async_trait]
pub trait CommunicationStore: Send + Sync {
    async fn rows(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CommunicationRow>, FusionError>;
}

/// Planned and actual calendar events for a user's day
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn planned_events(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>, FusionError>;

    async fn actual_events(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>, FusionError>;
}

/// Persistent per-user ingestion cursor store.
///
/// Writes are atomic per user; the scheduler's single-flight guard makes
/// last-write-wins safe.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<IngestionCheckpoint>, FusionError>;
    async fn put(&self, checkpoint: &IngestionCheckpoint) -> Result<(), FusionError>;
}

/// Receives fully built read models after a window succeeds.
///
/// The presentation layer reads from here, so it only ever sees the last
/// successfully checkpointed timeline, never a partial one.
#[async_trait]
pub trait TimelineSink: Send + Sync {
    async fn publish(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
        artifacts: &DayArtifacts,
    ) -> Result<(), FusionError>;
}

/// In-memory checkpoint store
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, IngestionCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, user_id: &str) -> Result<Option<IngestionCheckpoint>, FusionError> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| FusionError::CheckpointError(e.to_string()))?;
        Ok(inner.get(user_id).cloned())
    }

    async fn put(&self, checkpoint: &IngestionCheckpoint) -> Result<(), FusionError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| FusionError::CheckpointError(e.to_string()))?;
        inner.insert(checkpoint.user_id.clone(), checkpoint.clone());
        Ok(())
    }
}

/// In-memory timeline sink keyed by user and day
#[derive(Default)]
pub struct MemoryTimelineSink {
    inner: Mutex<HashMap<(String, DateTime<Utc>), DayArtifacts>>,
}

impl MemoryTimelineSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published artifacts for a user's day, if any
    pub fn latest(&self, user_id: &str, day_start: DateTime<Utc>) -> Option<DayArtifacts> {
        self.inner
            .lock()
            .ok()?
            .get(&(user_id.to_string(), day_start))
            .cloned()
    }
}

#[async_trait]
impl TimelineSink for MemoryTimelineSink {
    async fn publish(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
        artifacts: &DayArtifacts,
    ) -> Result<(), FusionError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| FusionError::upstream("sink", e.to_string()))?;
        inner.insert((user_id.to_string(), day_start), artifacts.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WindowStats;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_checkpoint_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("u1").await.unwrap().is_none());

        let checkpoint = IngestionCheckpoint {
            user_id: "u1".to_string(),
            timezone: "America/New_York".to_string(),
            last_window_end: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            stats: WindowStats::default(),
        };
        store.put(&checkpoint).await.unwrap();

        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.last_window_end, checkpoint.last_window_end);
        assert_eq!(loaded.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn test_memory_sink_latest_wins() {
        let sink = MemoryTimelineSink::new();
        let day = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

        let empty = DayArtifacts::default();
        sink.publish("u1", day, &empty).await.unwrap();
        assert!(sink.latest("u1", day).is_some());
        assert!(sink.latest("u2", day).is_none());
    }
}
