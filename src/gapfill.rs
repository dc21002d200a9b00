//! Gap filling
//!
//! This module converts a day's location blocks into calendar-shaped
//! `ScheduledEvent`s, merges them with user-entered events, and fills
//! unaccounted time with synthetic Sleep/Unknown segments. User events always
//! win: a derived block whose midpoint lands inside a user event is dropped.

use crate::types::{
    BlockKind, DerivedKind, EventCategory, EventMeta, LocationBlock, ScheduledEvent,
    MINUTES_PER_DAY,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Gaps shorter than this are left alone
pub const MIN_GAP_MINUTES: u32 = 5;
/// Fraction of a gap that must overlap planned sleep to label it Sleep
pub const SLEEP_OVERLAP_RATIO: f64 = 0.5;

/// Confidence attached to block-derived events is the block's own confidence;
/// these cover the synthetic fills
const SLEEP_FILL_CONFIDENCE: f64 = 0.6;
const UNKNOWN_FILL_CONFIDENCE: f64 = 0.3;

/// Stateless gap filler for one day
pub struct GapFiller;

impl GapFiller {
    /// Build the day's gap-filled schedule.
    ///
    /// `day_start` is the target day's midnight; `today_start` is the current
    /// day's midnight. Days more than one day in the future return only the
    /// user's own events.
    pub fn fill_day(
        day_start: DateTime<Utc>,
        today_start: DateTime<Utc>,
        blocks: &[LocationBlock],
        user_events: &[ScheduledEvent],
        planned_events: &[ScheduledEvent],
    ) -> Vec<ScheduledEvent> {
        let mut events: Vec<ScheduledEvent> = user_events.to_vec();

        let days_ahead = (day_start - today_start).num_days();
        if days_ahead > 1 {
            events.sort_by_key(|e| e.start_minutes);
            return events;
        }

        // Derived block events, dropped when a user event already covers their
        // midpoint
        for block in blocks {
            if let Some(event) = block_to_event(block, day_start) {
                let midpoint = event.start_minutes + event.duration_minutes / 2;
                let covered = user_events.iter().any(|u| u.contains_minute(midpoint));
                if !covered {
                    events.push(event);
                }
            }
        }

        events.sort_by_key(|e| e.start_minutes);

        let sleep_windows = sleep_intervals(planned_events);
        let fills = fill_gaps(&events, &sleep_windows);
        events.extend(fills);
        events.sort_by_key(|e| e.start_minutes);

        events
    }
}

/// Convert a block into a derived event, clamped to the day.
///
/// Blocks that fall entirely outside the day yield nothing.
fn block_to_event(block: &LocationBlock, day_start: DateTime<Utc>) -> Option<ScheduledEvent> {
    let day_end = day_start + Duration::minutes(MINUTES_PER_DAY as i64);
    let start = block.start_time.max(day_start);
    let end = block.end_time.min(day_end);
    if end <= start {
        return None;
    }

    let start_minutes = (start - day_start).num_minutes().clamp(0, 1439) as u32;
    let end_minutes = (end - day_start).num_minutes().clamp(0, MINUTES_PER_DAY as i64) as u32;
    if end_minutes <= start_minutes {
        return None;
    }

    Some(ScheduledEvent {
        id: Uuid::new_v4().to_string(),
        title: block.location_label.clone(),
        description: block.activity_inference.clone(),
        start_minutes,
        duration_minutes: end_minutes - start_minutes,
        category: block_category(block),
        meta: EventMeta::Derived {
            kind: DerivedKind::LocationBlock,
            confidence: block.confidence,
            block_id: Some(block.id.clone()),
            extra: HashMap::new(),
        },
    })
}

/// Fixed category lookup: home maps to routine, gym to health, restaurant to
/// meal, travel blocks to travel, anything else to unknown
fn block_category(block: &LocationBlock) -> EventCategory {
    if block.kind == BlockKind::Travel {
        return EventCategory::Travel;
    }

    let haystack = format!(
        "{} {}",
        block.location_category.as_deref().unwrap_or(""),
        block.location_label
    )
    .to_lowercase();

    if haystack.contains("home") {
        EventCategory::Routine
    } else if haystack.contains("gym") || haystack.contains("fitness") {
        EventCategory::Health
    } else if haystack.contains("restaurant") || haystack.contains("cafe") {
        EventCategory::Meal
    } else {
        EventCategory::Unknown
    }
}

/// Planned-sleep intervals in day minutes
fn sleep_intervals(planned: &[ScheduledEvent]) -> Vec<(u32, u32)> {
    planned
        .iter()
        .filter(|e| e.category == EventCategory::Sleep)
        .map(|e| (e.start_minutes, e.end_minutes()))
        .collect()
}

/// Minutes of `[start, end)` covered by any sleep interval
fn sleep_overlap(start: u32, end: u32, sleep_windows: &[(u32, u32)]) -> u32 {
    sleep_windows
        .iter()
        .map(|&(s, e)| end.min(e).saturating_sub(start.max(s)))
        .sum()
}

/// Fill unaccounted time between sorted events.
///
/// Interior gaps of at least five minutes always get a fill; leading and
/// trailing day gaps are filled only when they overlap planned sleep.
fn fill_gaps(sorted: &[ScheduledEvent], sleep_windows: &[(u32, u32)]) -> Vec<ScheduledEvent> {
    let mut fills = Vec::new();

    if sorted.is_empty() {
        if let Some(fill) = edge_fill(0, MINUTES_PER_DAY, sleep_windows) {
            fills.push(fill);
        }
        return fills;
    }

    // Leading gap
    let first_start = sorted[0].start_minutes;
    if let Some(fill) = edge_fill(0, first_start, sleep_windows) {
        fills.push(fill);
    }

    // Interior gaps; cursor tracks the furthest end seen so overlapping
    // events never produce a fill inside covered time
    let mut cursor = sorted[0].end_minutes();
    for event in &sorted[1..] {
        if event.start_minutes > cursor && event.start_minutes - cursor >= MIN_GAP_MINUTES {
            fills.push(make_fill(cursor, event.start_minutes, sleep_windows));
        }
        cursor = cursor.max(event.end_minutes());
    }

    // Trailing gap
    if let Some(fill) = edge_fill(cursor, MINUTES_PER_DAY, sleep_windows) {
        fills.push(fill);
    }

    fills
}

/// A day-boundary gap is filled only when sleep covers at least half of it
fn edge_fill(start: u32, end: u32, sleep_windows: &[(u32, u32)]) -> Option<ScheduledEvent> {
    if end <= start || end - start < MIN_GAP_MINUTES {
        return None;
    }
    let overlap = sleep_overlap(start, end, sleep_windows);
    if (overlap as f64) / ((end - start) as f64) >= SLEEP_OVERLAP_RATIO {
        Some(fill_event(start, end, EventCategory::Sleep))
    } else {
        None
    }
}

fn make_fill(start: u32, end: u32, sleep_windows: &[(u32, u32)]) -> ScheduledEvent {
    let overlap = sleep_overlap(start, end, sleep_windows);
    let category = if (overlap as f64) / ((end - start) as f64) >= SLEEP_OVERLAP_RATIO {
        EventCategory::Sleep
    } else {
        EventCategory::Unknown
    };
    fill_event(start, end, category)
}

fn fill_event(start: u32, end: u32, category: EventCategory) -> ScheduledEvent {
    let (title, confidence) = match category {
        EventCategory::Sleep => ("Sleep", SLEEP_FILL_CONFIDENCE),
        _ => ("Unknown", UNKNOWN_FILL_CONFIDENCE),
    };
    ScheduledEvent {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        description: None,
        start_minutes: start,
        duration_minutes: end - start,
        category,
        meta: EventMeta::Derived {
            kind: DerivedKind::GapFill,
            confidence,
            block_id: None,
            extra: HashMap::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppUsage;
    use chrono::TimeZone;

    fn day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn block(label: &str, start_min: i64, end_min: i64, kind: BlockKind) -> LocationBlock {
        LocationBlock {
            id: Uuid::new_v4().to_string(),
            start_time: day() + Duration::minutes(start_min),
            end_time: day() + Duration::minutes(end_min),
            location_label: label.to_string(),
            location_category: None,
            inferred_place: None,
            kind,
            apps: Vec::<AppUsage>::new(),
            activity_inference: None,
            confidence: 0.8,
        }
    }

    fn user_event(title: &str, start: u32, duration: u32) -> ScheduledEvent {
        ScheduledEvent {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: None,
            start_minutes: start,
            duration_minutes: duration,
            category: EventCategory::Work,
            meta: EventMeta::user(),
        }
    }

    fn sleep_plan(start: u32, duration: u32) -> ScheduledEvent {
        ScheduledEvent {
            id: Uuid::new_v4().to_string(),
            title: "Sleep".to_string(),
            description: None,
            start_minutes: start,
            duration_minutes: duration,
            category: EventCategory::Sleep,
            meta: EventMeta::user(),
        }
    }

    #[test]
    fn test_two_blocks_with_travel_gap_yield_three_events() {
        // Home until 9:00, a 20 minute unaccounted gap, Office from 9:20
        let blocks = vec![
            block("Home", 7 * 60, 9 * 60, BlockKind::Stationary),
            block("Office", 9 * 60 + 20, 12 * 60, BlockKind::Stationary),
        ];
        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &[]);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].title, "Home");
        assert_eq!(events[1].title, "Unknown");
        assert_eq!(events[1].start_minutes, 9 * 60);
        assert_eq!(events[1].duration_minutes, 20);
        assert_eq!(events[2].title, "Office");
    }

    #[test]
    fn test_far_future_day_returns_user_events_only() {
        let blocks = vec![block("Home", 0, 600, BlockKind::Stationary)];
        let user = vec![user_event("Dentist", 600, 60)];
        let future = day() + Duration::days(3);

        let events = GapFiller::fill_day(future, day(), &blocks, &user, &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Dentist");
    }

    #[test]
    fn test_category_lookup() {
        let cases = vec![
            (block("Home", 0, 60, BlockKind::Stationary), EventCategory::Routine),
            (block("Iron Gym", 0, 60, BlockKind::Stationary), EventCategory::Health),
            (block("Thai Restaurant", 0, 60, BlockKind::Stationary), EventCategory::Meal),
            (block("Highway 101", 0, 60, BlockKind::Travel), EventCategory::Travel),
            (block("Pier 39", 0, 60, BlockKind::Stationary), EventCategory::Unknown),
        ];
        for (b, expected) in cases {
            assert_eq!(block_category(&b), expected, "label {}", b.location_label);
        }
    }

    #[test]
    fn test_user_event_wins_over_derived_block() {
        // Block midpoint (10:00) lands inside the user's 9:30-11:00 event
        let blocks = vec![block("Office", 9 * 60, 11 * 60, BlockKind::Stationary)];
        let user = vec![user_event("Client workshop", 9 * 60 + 30, 90)];

        let events = GapFiller::fill_day(day(), day(), &blocks, &user, &[]);
        let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();
        assert!(titles.contains(&"Client workshop"));
        assert!(!titles.contains(&"Office"), "derived block must be dropped");
        assert!(events.iter().all(|e| !e.meta.is_synthetic()
            || matches!(e.meta, EventMeta::Derived { kind: DerivedKind::GapFill, .. })));
    }

    #[test]
    fn test_small_gaps_are_left_alone() {
        let blocks = vec![
            block("Home", 480, 540, BlockKind::Stationary),
            block("Office", 543, 600, BlockKind::Stationary),
        ];
        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &[]);
        assert_eq!(events.len(), 2, "3 minute gap must not be filled");
    }

    #[test]
    fn test_sleep_labelled_gap() {
        // Blocks end at 22:00 and resume at 23:30; planned sleep 22:00-06:00
        // covers the whole interior gap
        let blocks = vec![
            block("Home", 20 * 60, 22 * 60, BlockKind::Stationary),
            block("Home", 23 * 60 + 30, 23 * 60 + 50, BlockKind::Stationary),
        ];
        let planned = vec![sleep_plan(22 * 60, 2 * 60)];

        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &planned);
        let fill = events
            .iter()
            .find(|e| e.start_minutes == 22 * 60)
            .expect("gap fill present");
        assert_eq!(fill.category, EventCategory::Sleep);
        assert_eq!(fill.title, "Sleep");
    }

    #[test]
    fn test_leading_gap_filled_only_for_sleep() {
        let blocks = vec![block("Office", 9 * 60, 17 * 60, BlockKind::Stationary)];

        // Without planned sleep the morning stays empty
        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &[]);
        assert_eq!(events.len(), 1);

        // With sleep planned 00:00-07:00 the leading gap becomes Sleep
        let planned = vec![sleep_plan(0, 7 * 60)];
        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &planned);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].category, EventCategory::Sleep);
        assert_eq!(events[0].start_minutes, 0);
        assert_eq!(events[0].end_minutes(), 9 * 60);
    }

    #[test]
    fn test_no_interior_gap_at_least_five_minutes_remains() {
        // Property: concatenating the sorted result leaves no interior gap
        // of 5+ minutes
        let blocks = vec![
            block("Home", 7 * 60, 8 * 60, BlockKind::Stationary),
            block("Commute", 8 * 60 + 10, 9 * 60, BlockKind::Travel),
            block("Office", 9 * 60 + 45, 18 * 60, BlockKind::Stationary),
        ];
        let user = vec![user_event("Lunch", 12 * 60, 45)];
        let events = GapFiller::fill_day(day(), day(), &blocks, &user, &[]);

        let mut cursor: Option<u32> = None;
        for event in &events {
            if let Some(end) = cursor {
                let gap = event.start_minutes.saturating_sub(end);
                assert!(gap < MIN_GAP_MINUTES, "gap of {gap} min before {}", event.title);
            }
            cursor = Some(cursor.unwrap_or(0).max(event.end_minutes()));
        }
    }

    #[test]
    fn test_gap_fills_never_overlap_real_blocks() {
        let blocks = vec![
            block("Home", 0, 9 * 60, BlockKind::Stationary),
            block("Office", 10 * 60, 18 * 60, BlockKind::Stationary),
        ];
        let events = GapFiller::fill_day(day(), day(), &blocks, &[], &[]);

        let fills: Vec<&ScheduledEvent> = events
            .iter()
            .filter(|e| matches!(e.meta, EventMeta::Derived { kind: DerivedKind::GapFill, .. }))
            .collect();
        let real: Vec<&ScheduledEvent> = events
            .iter()
            .filter(|e| matches!(e.meta, EventMeta::Derived { kind: DerivedKind::LocationBlock, .. }))
            .collect();

        for fill in &fills {
            for block_event in &real {
                assert_eq!(
                    fill.overlap_minutes(block_event.start_minutes, block_event.end_minutes()),
                    0
                );
            }
        }
    }

    #[test]
    fn test_empty_day_with_sleep_plan() {
        let planned = vec![sleep_plan(0, 1440)];
        let events = GapFiller::fill_day(day(), day(), &[], &[], &planned);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::Sleep);
        assert_eq!(events[0].duration_minutes, 1440);
    }
}
