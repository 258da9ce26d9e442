use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::kind::{self, ToolKind};
use super::label::{resolve_label, LabelCatalog, StaticCatalog};
use super::preview;
use super::types::{Detail, DetailKind, DetailStatus, Stage};
use crate::events::{code_succeeded, AgentEvent, EventPayload, StageStatus};

/// Internal stage names hidden once completed or superseded.
pub const DEFAULT_SKIP_STAGES: &[&str] = &["thinking", "routing"];

const THINKING_KEY: &str = "stage:thinking";
const SOURCES_KEY: &str = "stage:sources";
const TASK_PREVIEW_CHARS: usize = 100;
const MESSAGE_PREVIEW_CHARS: usize = 200;
const CALL_PREVIEW_CHARS: usize = 120;

/// Folds an ordered event sequence into ordered [`Stage`]s.
///
/// All fold state (open-stage cursor, key index, tombstones) lives on the
/// instance, so independent correlators can run side by side. Removed stages
/// are tombstoned in place and filtered out when a snapshot is taken.
pub struct StageCorrelator {
    catalog: Arc<dyn LabelCatalog>,
    skip_stages: Vec<String>,
    slots: Vec<Option<Stage>>,
    /// Stage key -> slot position, for live (non-tombstoned) stages only.
    index: HashMap<String, usize>,
    /// The open stage, if any.
    cursor: Option<usize>,
    seq: u64,
}

impl Default for StageCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl StageCorrelator {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(StaticCatalog::new()),
            skip_stages: DEFAULT_SKIP_STAGES.iter().map(|s| s.to_string()).collect(),
            slots: Vec::new(),
            index: HashMap::new(),
            cursor: None,
            seq: 0,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn LabelCatalog>) -> Self {
        self.catalog = catalog;
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

    /// Fold a whole sequence from the current state and return the result.
    pub fn fold(mut self, events: &[AgentEvent]) -> Vec<Stage> {
        for event in events {
            self.apply(event);
        }
        self.into_stages()
    }

    /// Current stages in order, tombstones dropped.
    pub fn stages(&self) -> Vec<Stage> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.slots.into_iter().flatten().collect()
    }

    /// The currently open stage, if any.
    pub fn open_stage(&self) -> Option<&Stage> {
        self.cursor.and_then(|pos| self.slots[pos].as_ref())
    }

    /// Apply a single event. Never fails: events that do not fit are ignored.
    pub fn apply(&mut self, event: &AgentEvent) {
        match &event.payload {
            EventPayload::Routing { .. } => {}
            EventPayload::Stage {
                name,
                description,
                status,
            } => self.on_stage(event, name, description, *status),
            EventPayload::ToolCall {
                tool,
                call_id,
                args,
            } => self.on_tool_call(event, tool, call_id.as_deref(), args),
            EventPayload::ToolResult { tool, call_id, .. } => {
                self.on_tool_result(tool, call_id.as_deref())
            }
            EventPayload::Handoff {
                source_agent,
                target_agent,
                task,
            } => self.on_handoff(event, source_agent, target_agent, task),
            EventPayload::Source { title, url } => self.on_source(event, title, url),
            EventPayload::CodeResult {
                output,
                exit_code,
                error,
            } => self.on_code_result(event, output, *exit_code, error.as_deref()),
            EventPayload::Error { message } => self.on_error(event, message),
            // Timeline-only kinds; no stage state.
            EventPayload::BrowserAction { .. } | EventPayload::Token { .. } => {}
        }
    }

    // --- Event handlers ---

    fn on_stage(&mut self, event: &AgentEvent, name: &str, description: &str, status: StageStatus) {
        let step = match name.trim() {
            "" => "default",
            trimmed => trimmed,
        };
        let key = format!("stage:{step}");
        let skipped = self.is_skipped(step);

        if skipped && status == StageStatus::Completed {
            if self.remove(&key) {
                debug!(stage = %key, "removed completed internal stage");
            }
            return;
        }

        if status == StageStatus::Running && !skipped {
            self.auto_complete_thinking();
        }

        let description = description.trim();

        if let Some(&pos) = self.index.get(&key) {
            let reopens = self.slots[pos]
                .as_ref()
                .is_some_and(|s| !s.status.is_terminal());
            if self.cursor != Some(pos) && (status.is_terminal() || reopens) {
                self.close_open_stage(event.timestamp);
            }

            let catalog = Arc::clone(&self.catalog);
            let detail_id = self.next_id(&key);
            let Some(stage) = self.slots[pos].as_mut() else {
                return;
            };

            if status.is_terminal() {
                stage.status = status;
                stage.label = resolve_label(catalog.as_ref(), &stage.name, status);
                stage.ended_at = event.end_timestamp.or(event.timestamp);
                let redundant = stage.details.iter().any(|d| d.text == description);
                if !description.is_empty() && !redundant {
                    stage.details.push(info_detail(detail_id, description, event.timestamp));
                }
                self.cursor = None;
            } else if !stage.status.is_terminal() {
                // Terminal stages are never reopened.
                stage.status = status;
                stage.label = resolve_label(catalog.as_ref(), &stage.name, status);
                self.cursor = Some(pos);
            }
            return;
        }

        let mut stage = self.new_stage(key.clone(), step, status, event.timestamp);
        if !description.is_empty() {
            let id = self.next_id(&key);
            stage.details.push(info_detail(id, description, event.timestamp));
        }
        if status.is_terminal() {
            // A stage that arrives already finished leaves nothing open.
            self.close_open_stage(event.timestamp);
            stage.ended_at = event.end_timestamp.or(event.timestamp);
            self.push(stage);
        } else {
            self.open(stage, event.timestamp);
        }
    }

    fn on_tool_call(
        &mut self,
        event: &AgentEvent,
        tool: &str,
        call_id: Option<&str>,
        args: &Map<String, Value>,
    ) {
        let tool_kind = ToolKind::infer(tool);
        let correlation_id = match call_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => match event.timestamp {
                Some(ts) => format!("{tool}-{}", ts.timestamp_millis()),
                None => format!("{tool}-{}", self.bump()),
            },
        };

        let detail = Detail {
            id: format!("tool:{tool}:{correlation_id}"),
            text: preview(&kind::describe_call(tool, args), CALL_PREVIEW_CHARS),
            kind: tool_kind.detail_kind(),
            status: Some(DetailStatus::Running),
            correlation_id: Some(correlation_id),
            tool: Some(tool.to_string()),
            skill_id: kind::skill_id(tool, args),
            url: None,
            created_at: event.timestamp,
        };

        if let Some(stage) = self.open_stage_mut() {
            stage.details.push(detail);
            return;
        }

        let key = format!("stage:implicit:{}", self.bump());
        debug!(stage = %key, tool, "synthesized implicit stage for tool call");
        let mut stage = self.new_stage(
            key,
            tool_kind.stage_name(),
            StageStatus::Running,
            event.timestamp,
        );
        stage.details.push(detail);
        self.open(stage, event.timestamp);
    }

    fn on_tool_result(&mut self, tool: &str, call_id: Option<&str>) {
        let call_id = call_id.map(str::trim).filter(|id| !id.is_empty());
        let Some(stage) = self.open_stage_mut() else {
            debug!(tool, call_id, "dropping tool result with no open stage");
            return;
        };

        if let Some(id) = call_id {
            if let Some(detail) = stage
                .details
                .iter_mut()
                .rev()
                .find(|d| d.is_running() && d.correlation_id.as_deref() == Some(id))
            {
                detail.status = Some(DetailStatus::Completed);
                return;
            }
        }

        // Name fallback matches on the detail id, most recent first. With
        // several same-named calls in flight this can complete the wrong one.
        if !tool.is_empty() {
            if let Some(detail) = stage
                .details
                .iter_mut()
                .rev()
                .find(|d| d.is_running() && d.id.contains(tool))
            {
                detail.status = Some(DetailStatus::Completed);
                return;
            }
        }

        debug!(tool, call_id, "dropping unmatched tool result");
    }

    fn on_handoff(&mut self, event: &AgentEvent, source: &str, target: &str, task: &str) {
        self.auto_complete_thinking();

        let key = format!("stage:handoff:{}", self.bump());
        let name = match target.trim() {
            "" => "handoff",
            trimmed => trimmed,
        };
        let task = task.trim();
        let text = if task.is_empty() {
            format!("{source} → {target}")
        } else {
            format!("{source} → {target}: {}", preview(task, TASK_PREVIEW_CHARS))
        };

        let mut stage = self.new_stage(key.clone(), name, StageStatus::Running, event.timestamp);
        let id = self.next_id(&key);
        stage.details.push(info_detail(id, &text, event.timestamp));
        self.open(stage, event.timestamp);
    }

    fn on_source(&mut self, event: &AgentEvent, title: &str, url: &str) {
        let text = if title.trim().is_empty() { url } else { title };
        let detail = Detail {
            id: format!("source:{}", self.bump()),
            text: text.trim().to_string(),
            kind: DetailKind::Source,
            status: Some(DetailStatus::Completed),
            correlation_id: None,
            tool: None,
            skill_id: None,
            url: Some(url.to_string()).filter(|u| !u.is_empty()),
            created_at: event.timestamp,
        };

        if let Some(stage) = self.open_stage_mut() {
            stage.details.push(detail);
            return;
        }

        if let Some(&pos) = self.index.get(SOURCES_KEY) {
            if let Some(stage) = self.slots[pos].as_mut() {
                stage.details.push(detail);
            }
            return;
        }

        let mut stage = self.new_stage(
            SOURCES_KEY.to_string(),
            "sources",
            StageStatus::Running,
            event.timestamp,
        );
        stage.details.push(detail);
        self.open(stage, event.timestamp);
    }

    fn on_code_result(
        &mut self,
        event: &AgentEvent,
        output: &str,
        exit_code: Option<i64>,
        error: Option<&str>,
    ) {
        let error = error.map(str::trim).filter(|e| !e.is_empty());
        let success = code_succeeded(exit_code, error);

        let body = if success {
            output.trim()
        } else {
            error.unwrap_or(output.trim())
        };
        let text = match (success, exit_code) {
            (false, Some(code)) if body.is_empty() => format!("exit code {code}"),
            (false, Some(code)) => format!("exit code {code}: {}", preview(body, MESSAGE_PREVIEW_CHARS)),
            _ => preview(body, MESSAGE_PREVIEW_CHARS),
        };
        let (kind, status) = if success {
            (DetailKind::Code, DetailStatus::Completed)
        } else {
            (DetailKind::Error, DetailStatus::Failed)
        };
        let detail = Detail {
            id: format!("code:{}", self.bump()),
            text,
            kind,
            status: Some(status),
            correlation_id: None,
            tool: None,
            skill_id: None,
            url: None,
            created_at: event.timestamp,
        };

        if let Some(stage) = self.open_stage_mut() {
            stage.details.push(detail);
            return;
        }

        // Self-contained: never becomes the cursor.
        let key = format!("stage:code:{}", self.bump());
        let stage_status = if success {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        let mut stage = self.new_stage(key, "code", stage_status, event.timestamp);
        stage.ended_at = event.end_timestamp.or(event.timestamp);
        stage.details.push(detail);
        self.push(stage);
    }

    fn on_error(&mut self, event: &AgentEvent, message: &str) {
        let detail = Detail {
            id: format!("error:{}", self.bump()),
            text: preview(message.trim(), MESSAGE_PREVIEW_CHARS),
            kind: DetailKind::Error,
            status: Some(DetailStatus::Failed),
            correlation_id: None,
            tool: None,
            skill_id: None,
            url: None,
            created_at: event.timestamp,
        };

        let catalog = Arc::clone(&self.catalog);
        if let Some(stage) = self.open_stage_mut() {
            stage.details.push(detail);
            stage.status = StageStatus::Failed;
            stage.label = resolve_label(catalog.as_ref(), &stage.name, StageStatus::Failed);
            return;
        }

        let key = format!("stage:error:{}", self.bump());
        let mut stage = self.new_stage(key, "error", StageStatus::Failed, event.timestamp);
        stage.ended_at = event.end_timestamp.or(event.timestamp);
        stage.details.push(detail);
        self.push(stage);
    }

    // --- Fold state helpers ---

    fn is_skipped(&self, step: &str) -> bool {
        self.skip_stages.iter().any(|s| s == step)
    }

    /// A real stage supersedes a still-running thinking placeholder.
    fn auto_complete_thinking(&mut self) {
        let running = self
            .index
            .get(THINKING_KEY)
            .and_then(|&pos| self.slots[pos].as_ref())
            .is_some_and(|s| s.status == StageStatus::Running);
        if running && self.remove(THINKING_KEY) {
            debug!("thinking stage superseded");
        }
    }

    /// Tombstone the stage with `key`. Returns whether one existed.
    fn remove(&mut self, key: &str) -> bool {
        let Some(pos) = self.index.remove(key) else {
            return false;
        };
        self.slots[pos] = None;
        if self.cursor == Some(pos) {
            self.cursor = None;
        }
        true
    }

    fn push(&mut self, stage: Stage) -> usize {
        let pos = self.slots.len();
        self.index.insert(stage.id.clone(), pos);
        self.slots.push(Some(stage));
        pos
    }

    /// Record `stage` and make it the open stage.
    fn open(&mut self, stage: Stage, at: Option<DateTime<Utc>>) {
        self.close_open_stage(at);
        let pos = self.push(stage);
        self.cursor = Some(pos);
    }

    /// Close the cursor. A still-running open stage is finished as completed,
    /// so only the open stage is ever left running.
    fn close_open_stage(&mut self, at: Option<DateTime<Utc>>) {
        let catalog = Arc::clone(&self.catalog);
        if let Some(stage) = self.open_stage_mut() {
            if stage.status == StageStatus::Running {
                stage.status = StageStatus::Completed;
                stage.label = resolve_label(catalog.as_ref(), &stage.name, StageStatus::Completed);
                stage.ended_at = stage.ended_at.or(at);
                debug!(stage = %stage.id, "open stage superseded");
            }
        }
        self.cursor = None;
    }

    fn open_stage_mut(&mut self) -> Option<&mut Stage> {
        let pos = self.cursor?;
        self.slots[pos].as_mut()
    }

    fn new_stage(
        &self,
        key: String,
        name: &str,
        status: StageStatus,
        created_at: Option<DateTime<Utc>>,
    ) -> Stage {
        Stage {
            id: key,
            name: name.to_string(),
            status,
            label: resolve_label(self.catalog.as_ref(), name, status),
            details: Vec::new(),
            created_at,
            ended_at: None,
        }
    }

    fn bump(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn next_id(&mut self, key: &str) -> String {
        format!("{key}:info:{}", self.bump())
    }
}

fn info_detail(id: String, text: &str, at: Option<DateTime<Utc>>) -> Detail {
    Detail {
        created_at: at,
        ..Detail::info(id, text)
    }
}

/// Fold with the default skip set and an empty label catalog.
pub fn fold(events: &[AgentEvent]) -> Vec<Stage> {
    StageCorrelator::new().fold(events)
}
