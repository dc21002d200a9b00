//! Timeline event building
//!
//! This module merges the three per-source event families (app usage
//! sessions, communication events, calendar entries) into one sorted,
//! overlap-annotated daily view. The output is a read model: rebuilt on
//! demand, never mutated in place.

use crate::types::{
    AppUsage, CommunicationRow, ScheduledEvent, TimelineEvent, TimelineKind, MINUTES_PER_DAY,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Sessions of the same app separated by at most this are one run
pub const SESSION_MERGE_GAP_MINUTES: i64 = 2;
/// Duration assumed for a communication without an explicit end
pub const DEFAULT_COMM_DURATION_MINUTES: i64 = 5;

/// App categories that count as productive / unproductive for the hint flag
const PRODUCTIVE_CATEGORIES: [&str; 4] = ["productivity", "work", "developer", "education"];
const UNPRODUCTIVE_CATEGORIES: [&str; 3] = ["social", "entertainment", "games"];

/// Stateless builder for a day's timeline view
pub struct TimelineBuilder;

impl TimelineBuilder {
    /// Build the merged, sorted, overlap-annotated timeline for one day.
    ///
    /// `now_minutes` is the current offset into the day, or `-1` when the
    /// target day is not today (such days are rendered entirely past).
    pub fn build_day(
        day_start: DateTime<Utc>,
        now_minutes: i32,
        apps: &[AppUsage],
        communications: &[CommunicationRow],
        planned: &[ScheduledEvent],
        actual: &[ScheduledEvent],
    ) -> Vec<TimelineEvent> {
        let mut events = Vec::new();
        events.extend(app_events(apps));
        events.extend(communication_events(communications));
        events.extend(calendar_events(day_start, planned, actual));

        // Sort before overlap detection: the early-break scan below is only
        // sound on start-ordered input
        events.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then(a.end_time.cmp(&b.end_time))
        });

        mark_past(&mut events, day_start, now_minutes);
        annotate_overlaps(&mut events);

        events
    }
}

/// One timeline event per merged app run; runs of the same app separated by
/// two minutes or less collapse into one
fn app_events(apps: &[AppUsage]) -> Vec<TimelineEvent> {
    let mut events = Vec::new();

    for app in apps {
        let mut sessions = app.sessions.clone();
        if sessions.is_empty() {
            continue;
        }
        sessions.sort_by_key(|s| s.start_time);

        let mut run_start = sessions[0].start_time;
        let mut run_end = sessions[0].end_time;

        for session in &sessions[1..] {
            if session.start_time - run_end <= Duration::minutes(SESSION_MERGE_GAP_MINUTES) {
                run_end = run_end.max(session.end_time);
            } else {
                events.push(app_event(app, run_start, run_end));
                run_start = session.start_time;
                run_end = session.end_time;
            }
        }
        events.push(app_event(app, run_start, run_end));
    }

    events
}

fn app_event(app: &AppUsage, start: DateTime<Utc>, end: DateTime<Utc>) -> TimelineEvent {
    // Duration is the wall-clock span; overlapping raw sessions never
    // inflate it past real elapsed time
    TimelineEvent {
        id: Uuid::new_v4().to_string(),
        kind: TimelineKind::App,
        title: app.display_name.clone(),
        subtitle: app.category.clone(),
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        is_productive: productivity_hint(app.category.as_deref()),
        is_past: false,
        overlaps: Vec::new(),
    }
}

fn productivity_hint(category: Option<&str>) -> Option<bool> {
    let category = category?.to_lowercase();
    if PRODUCTIVE_CATEGORIES.iter().any(|c| category.contains(c)) {
        Some(true)
    } else if UNPRODUCTIVE_CATEGORIES.iter().any(|c| category.contains(c)) {
        Some(false)
    } else {
        None
    }
}

/// Map communication rows into timeline events.
///
/// Rows with an unrecognized type or no usable timestamp are skipped, never
/// fatal.
fn communication_events(rows: &[CommunicationRow]) -> Vec<TimelineEvent> {
    rows.iter().filter_map(communication_event).collect()
}

fn communication_event(row: &CommunicationRow) -> Option<TimelineEvent> {
    let kind = comm_kind(&row.row_type)?;

    // Timestamp priority: sent > received > scheduled start > created
    let start = row
        .sent_at
        .or(row.received_at)
        .or(row.scheduled_start)
        .or(row.created_at)?;

    let end = match row.scheduled_end {
        Some(end) if end > start => end,
        _ => start + Duration::minutes(DEFAULT_COMM_DURATION_MINUTES),
    };

    Some(TimelineEvent {
        id: Uuid::new_v4().to_string(),
        kind,
        title: row.title.clone(),
        subtitle: comm_subtitle(row),
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        is_productive: None,
        is_past: false,
        overlaps: Vec::new(),
    })
}

/// Count of rows that convert into timeline events, for run statistics
pub(crate) fn converted_communications(rows: &[CommunicationRow]) -> u32 {
    rows.iter()
        .filter(|r| communication_event(r).is_some())
        .count() as u32
}

fn comm_kind(row_type: &str) -> Option<TimelineKind> {
    match row_type.to_lowercase().as_str() {
        "email" | "email_sent" | "email_received" => Some(TimelineKind::Email),
        "message" | "sms" | "chat" => Some(TimelineKind::Message),
        "call" | "phone_call" | "video_call" => Some(TimelineKind::Call),
        "meeting" | "meeting_request" | "invite" => Some(TimelineKind::Meeting),
        _ => None,
    }
}

/// Subtitle from recipient/attendee/channel metadata, in that order
fn comm_subtitle(row: &CommunicationRow) -> Option<String> {
    let text = |key: &str| {
        row.meta
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    };

    if let Some(recipient) = text("recipient") {
        Some(format!("To {recipient}"))
    } else if let Some(attendee) = text("attendee") {
        Some(format!("With {attendee}"))
    } else {
        text("channel").map(|channel| format!("in {channel}"))
    }
}

/// Merge planned calendar events with their recorded "actual" counterparts.
///
/// Matching priority: actual's back-reference id, else identical title with an
/// overlapping time range. Synthetic (derived/evidence) rows never appear in
/// the timeline.
fn calendar_events(
    day_start: DateTime<Utc>,
    planned: &[ScheduledEvent],
    actual: &[ScheduledEvent],
) -> Vec<TimelineEvent> {
    let actuals: Vec<&ScheduledEvent> = actual.iter().filter(|e| !e.meta.is_synthetic()).collect();
    let mut matched = vec![false; actuals.len()];
    let mut events = Vec::new();

    for plan in planned.iter().filter(|e| !e.meta.is_synthetic()) {
        let found = actuals.iter().enumerate().position(|(i, a)| {
            !matched[i]
                && match a.meta.planned_ref() {
                    Some(ref_id) => ref_id == plan.id,
                    None => {
                        a.title == plan.title
                            && a.overlap_minutes(plan.start_minutes, plan.end_minutes()) > 0
                    }
                }
        });

        match found {
            Some(i) => {
                matched[i] = true;
                // What actually happened wins the time range; the plan keeps
                // naming rights
                events.push(scheduled_to_timeline(
                    day_start,
                    actuals[i],
                    TimelineKind::Meeting,
                    Some(plan.title.clone()),
                ));
            }
            None => {
                events.push(scheduled_to_timeline(
                    day_start,
                    plan,
                    TimelineKind::Scheduled,
                    None,
                ));
            }
        }
    }

    for (i, a) in actuals.iter().enumerate() {
        if !matched[i] {
            events.push(scheduled_to_timeline(day_start, a, TimelineKind::Meeting, None));
        }
    }

    events
}

fn scheduled_to_timeline(
    day_start: DateTime<Utc>,
    event: &ScheduledEvent,
    kind: TimelineKind,
    title_override: Option<String>,
) -> TimelineEvent {
    let start = day_start + Duration::minutes(event.start_minutes as i64);
    let end = day_start + Duration::minutes(event.end_minutes() as i64);
    TimelineEvent {
        id: event.id.clone(),
        kind,
        title: title_override.unwrap_or_else(|| event.title.clone()),
        subtitle: event.description.clone(),
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        is_productive: None,
        is_past: false,
        overlaps: Vec::new(),
    }
}

/// An event is past once its end-of-day minute is at or before "now";
/// non-today days are entirely past
fn mark_past(events: &mut [TimelineEvent], day_start: DateTime<Utc>, now_minutes: i32) {
    for event in events.iter_mut() {
        if now_minutes < 0 {
            event.is_past = true;
        } else {
            let end_minute = (event.end_time - day_start)
                .num_minutes()
                .clamp(0, MINUTES_PER_DAY as i64) as i32;
            event.is_past = end_minute <= now_minutes;
        }
    }
}

/// Record the symmetric overlap relation on every pair of intersecting
/// events.
///
/// Precondition: `events` is sorted ascending by start time. The forward scan
/// breaks as soon as a candidate starts at or after the current event's end,
/// which is only sound under that ordering.
fn annotate_overlaps(events: &mut [TimelineEvent]) {
    for i in 0..events.len() {
        for j in (i + 1)..events.len() {
            if events[j].start_time >= events[i].end_time {
                break;
            }
            if events[j].end_time > events[i].start_time {
                let id_i = events[i].id.clone();
                let id_j = events[j].id.clone();
                events[i].overlaps.push(id_j);
                events[j].overlaps.push(id_i);
            }
        }
    }
}
