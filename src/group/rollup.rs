use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::ReplayMode;
use crate::events::StageStatus;
use crate::stage::kind::is_skill_wrapper;
use crate::stage::{Detail, DetailStatus, Stage};

/// Invocations of one tool (or one skill) within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolGroup {
    /// Tool name, or `<wrapper>:<skill_id>` for skill invocations.
    pub key: String,
    pub display_name: String,
    pub count: usize,
    pub completed_count: usize,
}

/// A stage plus its tool rollup and time bounds, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageGroup {
    pub stage: Stage,
    pub tools: Vec<ToolGroup>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Overall completion numbers for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub completed: usize,
    pub total: usize,
    pub total_tools: usize,
    pub has_error: bool,
}

impl ProgressSummary {
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Status as displayed. Historical replays treat every non-failed stage as done.
pub fn effective_status(stage: &Stage, mode: ReplayMode) -> StageStatus {
    match (mode, stage.status) {
        (_, StageStatus::Failed) => StageStatus::Failed,
        (ReplayMode::Historical, _) => StageStatus::Completed,
        (ReplayMode::Live, status) => status,
    }
}

/// Build display groups and the completion summary from folded stages.
pub fn aggregate(stages: &[Stage], mode: ReplayMode) -> (Vec<StageGroup>, ProgressSummary) {
    let mut summary = ProgressSummary {
        total: stages.len(),
        ..Default::default()
    };

    let mut groups = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        let status = effective_status(stage, mode);
        match status {
            StageStatus::Completed => summary.completed += 1,
            StageStatus::Failed => summary.has_error = true,
            _ => {}
        }
        summary.total_tools += stage.tool_count();

        let start_time = stage_start(stage);
        // Finished stages without a recorded end close where the next one opens.
        let end_time = stage.ended_at.or_else(|| {
            if !status.is_terminal() {
                return None;
            }
            stages[i + 1..]
                .iter()
                .find_map(stage_start)
                .or_else(|| stage.details.iter().filter_map(|d| d.created_at).max())
        });

        groups.push(StageGroup {
            stage: stage.clone(),
            tools: rollup_tools(&stage.details, mode),
            start_time,
            end_time,
        });
    }

    (groups, summary)
}

fn stage_start(stage: &Stage) -> Option<DateTime<Utc>> {
    stage
        .created_at
        .or_else(|| stage.details.iter().find_map(|d| d.created_at))
}

/// Group tool-like details by tool (and skill id), in first-seen order.
pub fn rollup_tools(details: &[Detail], mode: ReplayMode) -> Vec<ToolGroup> {
    let mut groups: Vec<ToolGroup> = Vec::new();

    for detail in details.iter().filter(|d| d.kind.is_tool_like()) {
        let tool = detail.tool.as_deref().unwrap_or("tool");
        let (key, display_name) = match detail.skill_id.as_deref() {
            Some(skill) if is_skill_wrapper(tool) => (format!("{tool}:{skill}"), skill.to_string()),
            _ => (tool.to_string(), tool.to_string()),
        };
        let done = mode.is_historical() || detail.status == Some(DetailStatus::Completed);

        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => {
                group.count += 1;
                group.completed_count += usize::from(done);
            }
            None => groups.push(ToolGroup {
                key,
                display_name,
                count: 1,
                completed_count: usize::from(done),
            }),
        }
    }

    groups
}
