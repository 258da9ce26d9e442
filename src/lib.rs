pub mod duration;
pub mod error;
pub mod events;
pub mod group;
pub mod source;
pub mod stage;
pub mod timeline;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use duration::{Clock, DurationTracker, FixedClock, ReplayMode, SystemClock};
pub use error::ProgressError;
pub use events::{normalize, parse_stream, AgentEvent, EventKind, EventPayload, StageStatus};
pub use group::{
    aggregate, group_consecutive, PlanGroup, PlanItem, ProgressSummary, StageGroup, ToolGroup,
};
pub use source::{EventSource, FileEventSource, MemoryEventSource};
pub use stage::{
    fold, Detail, DetailKind, DetailStatus, LabelCatalog, Stage, StageCorrelator, StaticCatalog,
    DEFAULT_SKIP_STAGES,
};
pub use timeline::{
    Channel, PlaybackController, PlaybackFrame, PlaybackSpeed, SharedTimeline, TimelineIndex,
    TimelineItem, VisibleSlice,
};

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub mode: ReplayMode,
    /// Stage names that are hidden once completed.
    pub skip_stages: Vec<String>,
    pub speed: PlaybackSpeed,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::Live,
            skip_stages: DEFAULT_SKIP_STAGES.iter().map(|s| s.to_string()).collect(),
            speed: PlaybackSpeed::X1,
        }
    }
}

impl ProgressConfig {
    pub fn with_mode(mut self, mode: ReplayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_skip_stages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_stages = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_speed(mut self, speed: PlaybackSpeed) -> Self {
        self.speed = speed;
        self
    }
}

/// Everything a progress view renders for one point in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stages: Vec<Stage>,
    pub groups: Vec<StageGroup>,
    pub summary: ProgressSummary,
}

/// Collects a run's events and derives stages, groups, and the replay timeline.
///
/// Snapshots are re-folded from the full event list, so the same events always
/// produce the same stages.
pub struct ProgressTracker {
    config: ProgressConfig,
    catalog: Arc<dyn LabelCatalog>,
    events: Vec<AgentEvent>,
    timeline: SharedTimeline,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            catalog: Arc::new(StaticCatalog::new()),
            events: Vec::new(),
            timeline: SharedTimeline::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: impl LabelCatalog + 'static) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Load a recorded run for replay.
    pub async fn from_source(
        source: &dyn EventSource,
        run_id: &str,
        config: ProgressConfig,
    ) -> Result<Self, ProgressError> {
        let events = source.load(run_id).await?;
        info!(run_id, events = events.len(), mode = ?config.mode, "loaded run");
        let mut tracker = Self::new(config);
        tracker.extend(events);
        Ok(tracker)
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }

    pub fn events(&self) -> &[AgentEvent] {
        &self.events
    }

    /// Record one event and route it onto its timeline channel.
    pub fn push(&mut self, event: AgentEvent) {
        if let Some(item) = self.timeline_item(&event) {
            let at = event.timestamp.unwrap_or_else(Utc::now);
            let entry = self.timeline.append(item, at);
            debug!(kind = %event.kind(), channel = ?entry.channel, "event recorded");
        } else {
            debug!(kind = %event.kind(), "event recorded");
        }
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AgentEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Fold everything seen so far into display-ready stages and groups.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let stages = StageCorrelator::new()
            .with_catalog(Arc::clone(&self.catalog))
            .with_skip_stages(self.config.skip_stages.iter().cloned())
            .fold(&self.events);
        let (groups, summary) = aggregate(&stages, self.config.mode);
        ProgressSnapshot {
            stages,
            groups,
            summary,
        }
    }

    /// Consecutive plan-channel items merged by name and type.
    pub fn plan_groups(&self) -> Vec<PlanGroup> {
        self.timeline
            .read(|index| group_consecutive(index.view(index.total_steps(), true).plan))
    }

    pub fn durations(&self) -> DurationTracker {
        DurationTracker::new(self.config.mode)
    }

    pub fn timeline(&self) -> &SharedTimeline {
        &self.timeline
    }

    /// A playback controller over this tracker's timeline.
    pub fn playback(&self) -> PlaybackController {
        PlaybackController::new(self.timeline.clone()).with_speed(self.config.speed)
    }

    fn timeline_item(&self, event: &AgentEvent) -> Option<TimelineItem> {
        // Internal stages never show up in the plan.
        if let EventPayload::Stage { name, .. } = &event.payload {
            let name = name.trim();
            if self.config.skip_stages.iter().any(|s| s == name) {
                return None;
            }
        }
        TimelineItem::from_event(event)
    }
}
