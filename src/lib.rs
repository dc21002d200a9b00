//! Dayline - Activity timeline construction from multi-source signals
//!
//! Dayline fuses heterogeneous per-user signals (location samples, hourly
//! place/activity summaries, communication rows, calendar events) into three
//! read models for a single day: location blocks, a gap-filled schedule, and
//! a merged timeline.
//!
//! ## Modules
//!
//! - **Fusion stages**: movement classification → block grouping → gap
//!   filling → timeline building, all pure and deterministic
//! - **Scheduler**: recurring, idempotent, windowed ingestion with per-user
//!   checkpoints and single-flight triggering

pub mod blocks;
pub mod error;
pub mod gapfill;
pub mod geo;
pub mod movement;
pub mod pipeline;
pub mod scheduler;
pub mod sources;
pub mod timeline;
pub mod types;

pub use error::FusionError;
pub use pipeline::{build_day, DayArtifacts, DayInput};

// Fusion stage exports
pub use blocks::LocationBlockGrouper;
pub use gapfill::GapFiller;
pub use movement::MovementClassifier;
pub use timeline::TimelineBuilder;

// Scheduler exports
pub use scheduler::{
    IngestionScheduler, RunOutcome, RunState, SchedulerConfig, SchedulerHandle, SourceSet,
};

// Core type exports
pub use types::{
    BlockKind, EventCategory, EventMeta, HourlySummary, IngestionCheckpoint, LocationBlock,
    LocationSample, MovementClassification, MovementState, ScheduledEvent, TimelineEvent,
    WindowStats,
};

/// Dayline version embedded in published artifacts
pub const DAYLINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for published artifacts
pub const PRODUCER_NAME: &str = "dayline";
