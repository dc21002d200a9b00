//! Location block grouping
//!
//! This module walks chronologically ordered hourly summaries and folds them
//! into contiguous place/activity segments. A new block opens whenever place
//! identity changes or an hour is missing from the sequence; identity is
//! matched by place id first, then coordinate proximity, then
//! case-insensitive label equality. Placeholder labels ("Unknown",
//! "Location") never match each other.

use crate::geo::haversine_distance_m;
use crate::types::{
    AppUsage, BlockKind, HourlySummary, InferredPlace, LocationBlock, MovementState,
};
use chrono::Duration;
use uuid::Uuid;

/// Hours within this distance of each other belong to the same place
pub const PROXIMITY_METERS: f64 = 200.0;

/// Labels that stand in for "we don't know where this was"
const PLACEHOLDER_LABELS: [&str; 2] = ["unknown", "location"];

/// Stateless grouper for a day's hourly summaries
pub struct LocationBlockGrouper;

impl LocationBlockGrouper {
    /// Fold ordered hourly summaries into contiguous blocks.
    ///
    /// The input must already be chronologically ordered (the enrichment
    /// collaborator guarantees this); the grouper never re-sorts.
    pub fn group(hours: &[HourlySummary]) -> Vec<LocationBlock> {
        let mut blocks = Vec::new();
        let mut current: Option<OpenBlock> = None;

        for hour in hours {
            match current.as_mut() {
                Some(open) if open.accepts(hour) => open.extend(hour),
                _ => {
                    if let Some(open) = current.take() {
                        blocks.push(open.close());
                    }
                    current = Some(OpenBlock::start(hour));
                }
            }
        }

        if let Some(open) = current {
            blocks.push(open.close());
        }

        blocks
    }
}

/// Whether two hours describe the same place.
///
/// Match priority: place id when both sides carry one, else coordinate
/// proximity, else case-insensitive labels (placeholders excluded).
fn same_place(a: &HourlySummary, b: &HourlySummary) -> bool {
    if let (Some(id_a), Some(id_b)) = (&a.place_id, &b.place_id) {
        return id_a == id_b;
    }

    if let (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) =
        (a.latitude, a.longitude, b.latitude, b.longitude)
    {
        return haversine_distance_m(lat_a, lon_a, lat_b, lon_b) < PROXIMITY_METERS;
    }

    let label_a = a.place_label.trim().to_lowercase();
    let label_b = b.place_label.trim().to_lowercase();
    if PLACEHOLDER_LABELS.contains(&label_a.as_str())
        && PLACEHOLDER_LABELS.contains(&label_b.as_str())
    {
        return false;
    }
    label_a == label_b
}

/// An hour spent moving belongs to a travel block; a `None` movement state is
/// folded into the enclosing stationary block rather than guessed as travel
fn hour_kind(hour: &HourlySummary) -> BlockKind {
    match hour.movement {
        Some(MovementState::Moving) => BlockKind::Travel,
        _ => BlockKind::Stationary,
    }
}

/// Accumulator for the block currently being built
struct OpenBlock {
    anchor: HourlySummary,
    kind: BlockKind,
    end_time: chrono::DateTime<chrono::Utc>,
    apps: Vec<AppUsage>,
    activities: Vec<String>,
    best_place: Option<InferredPlace>,
    confidence_weight: f64,
    confidence_sum: f64,
}

impl OpenBlock {
    fn start(hour: &HourlySummary) -> Self {
        let mut open = Self {
            anchor: hour.clone(),
            kind: hour_kind(hour),
            end_time: hour.hour_start + Duration::hours(1),
            apps: Vec::new(),
            activities: Vec::new(),
            best_place: None,
            confidence_weight: 0.0,
            confidence_sum: 0.0,
        };
        open.absorb(hour);
        open
    }

    /// A missing summary hour closes the block: a block never claims
    /// presence over unobserved time
    fn accepts(&self, hour: &HourlySummary) -> bool {
        hour.hour_start == self.end_time
            && hour_kind(hour) == self.kind
            && same_place(&self.anchor, hour)
    }

    fn extend(&mut self, hour: &HourlySummary) {
        self.end_time = hour.hour_start + Duration::hours(1);
        self.absorb(hour);
    }

    fn absorb(&mut self, hour: &HourlySummary) {
        for usage in &hour.apps {
            merge_app_usage(&mut self.apps, usage);
        }

        if let Some(activity) = &hour.activity {
            let activity = activity.trim();
            if !activity.is_empty() && !self.activities.iter().any(|a| a == activity) {
                self.activities.push(activity.to_string());
            }
        }

        if let Some(place) = &hour.inferred_place {
            // Hours are uniform-length, so duration weighting reduces to equal
            // weights per hour
            self.confidence_weight += 1.0;
            self.confidence_sum += place.confidence;

            let better = self
                .best_place
                .as_ref()
                .map(|best| place.confidence > best.confidence)
                .unwrap_or(true);
            if better {
                self.best_place = Some(place.clone());
            }
        }
    }

    fn close(self) -> LocationBlock {
        let confidence = if self.confidence_weight > 0.0 {
            self.confidence_sum / self.confidence_weight
        } else {
            0.0
        };

        let activity_inference = if self.activities.is_empty() {
            None
        } else {
            Some(self.activities.join(", "))
        };

        LocationBlock {
            id: Uuid::new_v4().to_string(),
            start_time: self.anchor.hour_start,
            end_time: self.end_time,
            location_label: self.anchor.place_label,
            location_category: self
                .best_place
                .as_ref()
                .and_then(|p| p.category.clone()),
            inferred_place: self.best_place,
            kind: self.kind,
            apps: self.apps,
            activity_inference,
            confidence,
        }
    }
}

/// Fold one hour's usage of an app into the block-level accumulator
fn merge_app_usage(apps: &mut Vec<AppUsage>, usage: &AppUsage) {
    if let Some(existing) = apps.iter_mut().find(|a| a.app_id == usage.app_id) {
        existing.sessions.extend(usage.sessions.iter().cloned());
        if existing.category.is_none() {
            existing.category = usage.category.clone();
        }
    } else {
        apps.push(usage.clone());
    }
}

/// Flatten app usage across blocks, merging per app id.
///
/// Used by the timeline builder, which works on a whole day's sessions.
pub fn collect_apps(blocks: &[LocationBlock]) -> Vec<AppUsage> {
    let mut apps: Vec<AppUsage> = Vec::new();
    for block in blocks {
        for usage in &block.apps {
            merge_app_usage(&mut apps, usage);
        }
    }
    apps
}

/// Total session count across blocks, for run statistics
pub fn count_sessions(blocks: &[LocationBlock]) -> u32 {
    blocks
        .iter()
        .flat_map(|b| &b.apps)
        .map(|a| a.sessions.len() as u32)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppSession;
    use chrono::{DateTime, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2024-01-15T{hour:02}:00:00Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hour(hour_of_day: u32, label: &str) -> HourlySummary {
        HourlySummary {
            hour_start: at(hour_of_day),
            place_label: label.to_string(),
            place_id: None,
            latitude: None,
            longitude: None,
            inferred_place: None,
            apps: Vec::new(),
            activity: None,
            movement: None,
        }
    }

    fn usage(app_id: &str, start: DateTime<Utc>, minutes: f64) -> AppUsage {
        AppUsage {
            app_id: app_id.to_string(),
            display_name: app_id.to_string(),
            category: None,
            sessions: vec![AppSession {
                start_time: start,
                end_time: start + Duration::minutes(minutes as i64),
                minutes,
            }],
        }
    }

    #[test]
    fn test_same_label_hours_form_one_block() {
        let hours = vec![hour(9, "Home"), hour(10, "home"), hour(11, "HOME")];
        let blocks = LocationBlockGrouper::group(&hours);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_time, at(9));
        assert_eq!(blocks[0].end_time, at(12));
        assert_eq!(blocks[0].kind, BlockKind::Stationary);
    }

    #[test]
    fn test_label_change_opens_new_block() {
        let hours = vec![hour(9, "Home"), hour(10, "Home"), hour(11, "Office")];
        let blocks = LocationBlockGrouper::group(&hours);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].location_label, "Home");
        assert_eq!(blocks[1].location_label, "Office");
        assert_eq!(blocks[1].start_time, at(11));
    }

    #[test]
    fn test_missing_hour_splits_block() {
        // Same place at 9:00 and 11:00 with no 10:00 summary: two blocks,
        // leaving the unobserved hour for the gap filler
        let hours = vec![hour(9, "Home"), hour(11, "Home")];
        let blocks = LocationBlockGrouper::group(&hours);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].end_time, at(10));
        assert_eq!(blocks[1].start_time, at(11));
    }

    #[test]
    fn test_place_id_takes_priority_over_label() {
        let mut a = hour(9, "Blue Bottle");
        a.place_id = Some("place-1".to_string());
        let mut b = hour(10, "Blue Bottle Coffee");
        b.place_id = Some("place-1".to_string());
        let mut c = hour(11, "Blue Bottle");
        c.place_id = Some("place-2".to_string());

        let blocks = LocationBlockGrouper::group(&[a, b, c]);
        assert_eq!(blocks.len(), 2, "same id merges, different id splits");
    }

    #[test]
    fn test_proximity_match_merges_nearby_hours() {
        let mut a = hour(9, "Cafe");
        a.latitude = Some(37.0);
        a.longitude = Some(-122.0);
        // ~55 m north, different label
        let mut b = hour(10, "Coffee Shop");
        b.latitude = Some(37.0005);
        b.longitude = Some(-122.0);

        let blocks = LocationBlockGrouper::group(&[a, b]);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_placeholder_labels_never_match_each_other() {
        let hours = vec![hour(9, "Unknown"), hour(10, "Location")];
        let blocks = LocationBlockGrouper::group(&hours);
        assert_eq!(blocks.len(), 2);

        let hours = vec![hour(9, "Unknown"), hour(10, "Unknown")];
        let blocks = LocationBlockGrouper::group(&hours);
        assert_eq!(blocks.len(), 2, "two unknowns are not the same place");
    }

    #[test]
    fn test_moving_hours_become_travel_block() {
        let mut a = hour(9, "Home");
        a.movement = Some(MovementState::Stationary);
        let mut b = hour(10, "Home");
        b.movement = Some(MovementState::Moving);
        let mut c = hour(11, "Office");
        c.movement = Some(MovementState::Stationary);

        let blocks = LocationBlockGrouper::group(&[a, b, c]);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].kind, BlockKind::Stationary);
        assert_eq!(blocks[1].kind, BlockKind::Travel);
        assert_eq!(blocks[2].kind, BlockKind::Stationary);
    }

    #[test]
    fn test_app_sessions_accumulate_within_block() {
        let mut a = hour(9, "Office");
        a.apps = vec![usage("com.slack", at(9), 20.0)];
        let mut b = hour(10, "Office");
        b.apps = vec![usage("com.slack", at(10), 15.0), usage("com.mail", at(10), 5.0)];

        let blocks = LocationBlockGrouper::group(&[a, b]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].apps.len(), 2);

        let slack = blocks[0]
            .apps
            .iter()
            .find(|u| u.app_id == "com.slack")
            .unwrap();
        assert_eq!(slack.sessions.len(), 2);
        assert!((slack.total_minutes() - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_block_confidence_averages_hour_confidence() {
        let mut a = hour(9, "Gym");
        a.inferred_place = Some(InferredPlace {
            name: "Iron Works".into(),
            category: Some("gym".into()),
            confidence: 0.9,
        });
        let mut b = hour(10, "Gym");
        b.inferred_place = Some(InferredPlace {
            name: "Iron Works".into(),
            category: Some("gym".into()),
            confidence: 0.7,
        });
        let c = hour(11, "Gym"); // no inference for this hour

        let blocks = LocationBlockGrouper::group(&[a, b, c]);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(blocks[0].location_category.as_deref(), Some("gym"));
        assert_eq!(
            blocks[0].inferred_place.as_ref().unwrap().confidence,
            0.9,
            "highest-confidence inference represents the block"
        );
    }

    #[test]
    fn test_activity_text_deduplicated_and_joined() {
        let mut a = hour(9, "Office");
        a.activity = Some("coding".to_string());
        let mut b = hour(10, "Office");
        b.activity = Some("coding".to_string());
        let mut c = hour(11, "Office");
        c.activity = Some("meetings".to_string());

        let blocks = LocationBlockGrouper::group(&[a, b, c]);
        assert_eq!(
            blocks[0].activity_inference.as_deref(),
            Some("coding, meetings")
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(LocationBlockGrouper::group(&[]).is_empty());
    }

    #[test]
    fn test_collect_apps_merges_across_blocks() {
        let mut a = hour(9, "Home");
        a.apps = vec![usage("com.mail", at(9), 10.0)];
        let mut b = hour(10, "Office");
        b.apps = vec![usage("com.mail", at(10), 20.0)];

        let blocks = LocationBlockGrouper::group(&[a, b]);
        assert_eq!(blocks.len(), 2);

        let apps = collect_apps(&blocks);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].sessions.len(), 2);
        assert_eq!(count_sessions(&blocks), 2);
    }
}
