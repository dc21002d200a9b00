//! Ingestion scheduling and checkpointing
//!
//! This module drives recurring, idempotent, windowed processing per user.
//! Each user owns an explicit run-state record (Idle -> Scheduled -> Running)
//! guarded by a check-and-set, so timer- and refresh-triggered invocations
//! share one single-flight path. The checkpoint advances only after a window
//! fully succeeds; a failed or torn-down window is simply retried next cycle.

use crate::error::FusionError;
use crate::pipeline::{build_day, DayArtifacts, DayInput};
use crate::sources::{
    CalendarStore, CheckpointStore, CommunicationStore, LocationSource, SummarySource,
    TimelineSink,
};
use crate::types::{IngestionCheckpoint, WindowStats};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default processing window, aligned to clock boundaries
pub const DEFAULT_WINDOW_MINUTES: i64 = 30;
/// Default cap on windows processed in one catch-up run
pub const DEFAULT_MAX_CATCHUP_WINDOWS: usize = 8;
/// Default recurring timer period in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Configuration for the ingestion scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Window size in minutes
    pub window_minutes: i64,
    /// Maximum windows processed per run; older backlog is skipped, not
    /// replayed unbounded
    pub max_catchup_windows: usize,
    /// Recurring timer period in seconds
    pub poll_interval_secs: u64,
    /// Whether the recurring loop processes at all
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_WINDOW_MINUTES,
            max_catchup_windows: DEFAULT_MAX_CATCHUP_WINDOWS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DAYLINE_WINDOW_MINUTES` | `30` | Processing window size |
    /// | `DAYLINE_MAX_CATCHUP_WINDOWS` | `8` | Catch-up bound per run |
    /// | `DAYLINE_POLL_INTERVAL_SECS` | `300` | Recurring timer period |
    /// | `DAYLINE_SCHEDULER_ENABLED` | `true` | Enable/disable the loop |
    pub fn from_env() -> Self {
        let window_minutes = std::env::var("DAYLINE_WINDOW_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_WINDOW_MINUTES)
            .max(1);

        let max_catchup_windows = std::env::var("DAYLINE_MAX_CATCHUP_WINDOWS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_CATCHUP_WINDOWS)
            .max(1);

        let poll_interval_secs = std::env::var("DAYLINE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let enabled = std::env::var("DAYLINE_SCHEDULER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            window_minutes,
            max_catchup_windows,
            poll_interval_secs,
            enabled,
        }
    }

    pub fn with_window_minutes(mut self, minutes: i64) -> Self {
        self.window_minutes = minutes.max(1);
        self
    }

    pub fn with_max_catchup(mut self, windows: usize) -> Self {
        self.max_catchup_windows = windows.max(1);
        self
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }
}

/// Per-user run state owned by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scheduled,
    Running,
}

/// What a triggered run actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one window was processed and checkpointed
    Completed {
        windows_processed: usize,
        stats: WindowStats,
    },
    /// A run was already in flight for this user; trigger dropped
    SkippedConcurrent,
    /// Less than one full window has elapsed since the checkpoint
    NothingToDo,
}

/// The external collaborators a scheduler drives
pub struct SourceSet {
    pub location: Arc<dyn LocationSource>,
    pub summaries: Arc<dyn SummarySource>,
    pub communications: Arc<dyn CommunicationStore>,
    pub calendar: Arc<dyn CalendarStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn TimelineSink>,
}

/// Per-user windowed ingestion driver.
///
/// No cross-user shared mutable state beyond the run-state map; fusion itself
/// is pure and synchronous.
pub struct IngestionScheduler {
    sources: SourceSet,
    config: SchedulerConfig,
    states: Arc<Mutex<HashMap<String, RunState>>>,
}

impl IngestionScheduler {
    pub fn new(sources: SourceSet, config: SchedulerConfig) -> Self {
        Self {
            sources,
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current run state for a user
    pub fn state(&self, user_id: &str) -> RunState {
        let states = lock_states(&self.states);
        states.get(user_id).copied().unwrap_or(RunState::Idle)
    }

    /// The one inbound trigger: process any unprocessed windows now.
    ///
    /// `force` additionally invalidates the enrichment service's place cache
    /// before running.
    pub async fn refresh(&self, user_id: &str, force: bool) -> Result<RunOutcome, FusionError> {
        if force {
            self.sources.summaries.invalidate(user_id).await;
        }
        self.run_user(user_id, Utc::now()).await
    }

    /// Run one ingestion cycle for a user at the given instant.
    ///
    /// Concurrent invocations for the same user are refused, not queued: the
    /// second caller gets `RunOutcome::SkippedConcurrent`. On any error the
    /// current window's checkpoint is left untouched so the next cycle
    /// retries it.
    pub async fn run_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, FusionError> {
        let Some(guard) = RunGuard::acquire(&self.states, user_id) else {
            debug!(user_id, "run already in flight, dropping trigger");
            return Ok(RunOutcome::SkippedConcurrent);
        };

        let checkpoint = self.sources.checkpoints.get(user_id).await?;
        let timezone = checkpoint
            .as_ref()
            .map(|c| c.timezone.clone())
            .unwrap_or_else(|| "UTC".to_string());
        let mut lifetime_stats = checkpoint.as_ref().map(|c| c.stats).unwrap_or_default();

        let last_window_end = checkpoint
            .map(|c| c.last_window_end)
            .unwrap_or_else(|| {
                align_floor(now, self.config.window_minutes)
                    - Duration::minutes(self.config.window_minutes)
            });

        let windows = self.plan_windows(user_id, last_window_end, now);
        if windows.is_empty() {
            return Ok(RunOutcome::NothingToDo);
        }

        guard.begin();

        let mut run_stats = WindowStats::default();
        let mut windows_processed = 0;

        for (start, end) in windows {
            let artifacts = self.process_window(user_id, start, end, now).await?;
            run_stats.merge(&artifacts.stats);
            lifetime_stats.merge(&artifacts.stats);

            // Publish before advancing: readers only ever observe a fully
            // built timeline behind an advanced checkpoint
            let day_start = day_floor(start);
            self.sources.sink.publish(user_id, day_start, &artifacts).await?;

            let advanced = IngestionCheckpoint {
                user_id: user_id.to_string(),
                timezone: timezone.clone(),
                last_window_end: end,
                stats: lifetime_stats,
            };
            self.sources.checkpoints.put(&advanced).await?;
            windows_processed += 1;

            info!(
                user_id,
                window_end = %end,
                segments = artifacts.stats.segments_created,
                sessions = artifacts.stats.sessions_processed,
                "window processed"
            );
        }

        Ok(RunOutcome::Completed {
            windows_processed,
            stats: run_stats,
        })
    }

    /// Unprocessed windows between the checkpoint and `now`, bounded.
    ///
    /// A backlog deeper than `max_catchup_windows` is skipped rather than
    /// replayed: the cursor jumps forward and only the most recent windows
    /// are processed.
    fn plan_windows(
        &self,
        user_id: &str,
        last_window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let window = Duration::minutes(self.config.window_minutes);
        let horizon = align_floor(now, self.config.window_minutes);

        let mut cursor = last_window_end;
        let backlog_limit = horizon - window * self.config.max_catchup_windows as i32;
        if cursor < backlog_limit {
            warn!(
                user_id,
                from = %cursor,
                to = %backlog_limit,
                "backlog exceeds catch-up bound, skipping ahead"
            );
            cursor = backlog_limit;
        }

        let mut windows = Vec::new();
        while cursor + window <= horizon && windows.len() < self.config.max_catchup_windows {
            windows.push((cursor, cursor + window));
            cursor = cursor + window;
        }
        windows
    }

    /// Rebuild the read models for the day containing one window.
    ///
    /// The window bounds only the checkpoint increment; fusion always runs
    /// over the containing day's data from midnight up to the window end, so
    /// each publish replaces the day with a strictly fuller rebuild rather
    /// than a single-window slice. Fetches are issued and awaited together;
    /// any single failure aborts the window before fusion runs.
    async fn process_window(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DayArtifacts, FusionError> {
        let day_start = day_floor(start);

        let (samples, summaries, communications, planned, actual) = tokio::join!(
            self.sources.location.samples(user_id, day_start, end),
            self.sources.summaries.hourly_summaries(user_id, day_start, end),
            self.sources.communications.rows(user_id, day_start, end),
            self.sources.calendar.planned_events(user_id, day_start),
            self.sources.calendar.actual_events(user_id, day_start),
        );
        let samples = samples?;
        let summaries = summaries?;
        let communications = communications?;
        let planned = planned?;
        let actual = actual?;

        let today_start = day_floor(now);
        let now_minutes = if today_start == day_start {
            (now - day_start).num_minutes() as i32
        } else {
            -1
        };

        Ok(build_day(DayInput {
            day_start,
            today_start,
            now_minutes,
            samples: &samples,
            summaries: &summaries,
            communications: &communications,
            planned: &planned,
            actual: &actual,
        }))
    }

    /// Spawn the recurring loop over a fixed user set.
    ///
    /// Each tick triggers `run_user` for every user; in-flight users drop the
    /// trigger via the single-flight guard.
    pub fn start(self: Arc<Self>, users: Vec<String>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            if !self.config.enabled {
                info!("ingestion scheduler disabled by config");
                return;
            }

            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                self.config.poll_interval_secs,
            ));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for user_id in &users {
                            match self.run_user(user_id, Utc::now()).await {
                                Ok(RunOutcome::Completed { windows_processed, .. }) => {
                                    info!(user_id, windows_processed, "ingestion cycle complete");
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    warn!(
                                        user_id,
                                        error = %err,
                                        "ingestion cycle failed, window retries next cycle"
                                    );
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("ingestion scheduler shutting down");
                        break;
                    }
                }
            }
        });

        SchedulerHandle { shutdown_tx, join }
    }
}

/// Handle for stopping a running scheduler loop
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// Floor an instant to the nearest earlier window boundary
fn align_floor(t: DateTime<Utc>, window_minutes: i64) -> DateTime<Utc> {
    let step = window_minutes * 60;
    let secs = t.timestamp();
    let floored = secs - secs.rem_euclid(step);
    DateTime::from_timestamp(floored, 0).unwrap_or(t)
}

/// Midnight of the day containing `t`
fn day_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    align_floor(t, 24 * 60)
}

/// Lock the state map, recovering from a poisoned lock; the map holds only
/// plain enums so a panicking holder cannot leave it inconsistent
fn lock_states(
    states: &Arc<Mutex<HashMap<String, RunState>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, RunState>> {
    states.lock().unwrap_or_else(|e| e.into_inner())
}

/// Single-flight guard: acquiring transitions Idle -> Scheduled via
/// check-and-set, `begin` marks Running, dropping returns the user to Idle
struct RunGuard {
    states: Arc<Mutex<HashMap<String, RunState>>>,
    user_id: String,
}

impl RunGuard {
    fn acquire(states: &Arc<Mutex<HashMap<String, RunState>>>, user_id: &str) -> Option<Self> {
        let mut map = lock_states(states);
        match map.get(user_id).copied().unwrap_or(RunState::Idle) {
            RunState::Idle => {
                map.insert(user_id.to_string(), RunState::Scheduled);
                Some(Self {
                    states: Arc::clone(states),
                    user_id: user_id.to_string(),
                })
            }
            _ => None,
        }
    }

    fn begin(&self) {
        let mut map = lock_states(&self.states);
        map.insert(self.user_id.clone(), RunState::Running);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut map = lock_states(&self.states);
        map.remove(&self.user_id);
    }
}
