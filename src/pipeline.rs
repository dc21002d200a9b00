//! Pipeline orchestration
//!
//! This module ties the fusion stages together for one day: movement
//! classification enriches the hourly summaries, the block grouper folds them
//! into segments, the gap filler produces the calendar-shaped schedule, and
//! the timeline builder emits the merged read model. Everything here is pure
//! and synchronous; the scheduler owns I/O and windowing.

use crate::blocks::{collect_apps, count_sessions, LocationBlockGrouper};
use crate::gapfill::GapFiller;
use crate::movement::MovementClassifier;
use crate::timeline::{converted_communications, TimelineBuilder};
use crate::types::{
    CommunicationRow, HourlySummary, LocationBlock, LocationSample, ScheduledEvent, TimelineEvent,
    WindowStats,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the fusion stages need for one day
#[derive(Debug, Clone, Copy)]
pub struct DayInput<'a> {
    /// Midnight of the target day
    pub day_start: DateTime<Utc>,
    /// Midnight of the current day (for future-day handling)
    pub today_start: DateTime<Utc>,
    /// Current offset into the target day in minutes, or -1 when not today
    pub now_minutes: i32,
    pub samples: &'a [LocationSample],
    pub summaries: &'a [HourlySummary],
    pub communications: &'a [CommunicationRow],
    pub planned: &'a [ScheduledEvent],
    pub actual: &'a [ScheduledEvent],
}

/// Read models produced for one day, plus run statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayArtifacts {
    pub blocks: Vec<LocationBlock>,
    pub schedule: Vec<ScheduledEvent>,
    pub timeline: Vec<TimelineEvent>,
    pub stats: WindowStats,
}

/// Run the full fusion pipeline for one day.
///
/// Pipeline stages:
/// 1. MovementClassifier - label the sample window, backfill hours that the
///    enrichment service left unlabelled
/// 2. LocationBlockGrouper - fold hours into contiguous place segments
/// 3. GapFiller - derive the calendar-shaped, gap-filled schedule
/// 4. TimelineBuilder - merge app/communication/calendar families
pub fn build_day(input: DayInput<'_>) -> DayArtifacts {
    let classification = MovementClassifier::classify(input.samples);

    // Hours without a movement label inherit the window classification; an
    // ambiguous window (state None) backfills nothing
    let mut summaries: Vec<HourlySummary> = input.summaries.to_vec();
    if let Some(state) = classification.state {
        for summary in summaries.iter_mut() {
            if summary.movement.is_none() {
                summary.movement = Some(state);
            }
        }
    }

    let blocks = LocationBlockGrouper::group(&summaries);

    let user_actuals: Vec<ScheduledEvent> = input
        .actual
        .iter()
        .filter(|e| e.meta.is_user())
        .cloned()
        .collect();

    let schedule = GapFiller::fill_day(
        input.day_start,
        input.today_start,
        &blocks,
        &user_actuals,
        input.planned,
    );

    let apps = collect_apps(&blocks);
    let timeline = TimelineBuilder::build_day(
        input.day_start,
        input.now_minutes,
        &apps,
        input.communications,
        input.planned,
        input.actual,
    );

    let converted = converted_communications(input.communications);
    let stats = WindowStats {
        sessions_processed: count_sessions(&blocks),
        segments_created: blocks.len() as u32,
        events_built: timeline.len() as u32,
        records_succeeded: converted + summaries.len() as u32,
        records_skipped: input.communications.len() as u32 - converted,
        records_failed: 0,
    };

    DayArtifacts {
        blocks,
        schedule,
        timeline,
        stats,
    }
}
