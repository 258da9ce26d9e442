use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ProgressError;

/// An activity event emitted while an agent executes a task.
///
/// Immutable once emitted. `end_timestamp` is only set by producers when the
/// event closes a previously open item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
}

/// Variant-specific payload. Closed set: adding a kind is a compile-time change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Stage {
        name: String,
        #[serde(default)]
        description: String,
        status: StageStatus,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        args: Map<String, Value>,
    },
    ToolResult {
        tool: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        output: String,
    },
    /// Internal routing chatter. Never materialized into visible state.
    Routing {
        #[serde(default)]
        payload: Value,
    },
    Handoff {
        source_agent: String,
        target_agent: String,
        #[serde(default)]
        task: String,
    },
    Source {
        title: String,
        url: String,
    },
    CodeResult {
        #[serde(default)]
        output: String,
        #[serde(default)]
        exit_code: Option<i64>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    BrowserAction {
        action: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        target: Option<String>,
        status: StageStatus,
    },
    Token {
        #[serde(default)]
        content: String,
    },
}

/// Discriminant of [`EventPayload`], for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stage,
    ToolCall,
    ToolResult,
    Routing,
    Handoff,
    Source,
    CodeResult,
    Error,
    BrowserAction,
    Token,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Stage => "stage",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Routing => "routing",
            EventKind::Handoff => "handoff",
            EventKind::Source => "source",
            EventKind::CodeResult => "code_result",
            EventKind::Error => "error",
            EventKind::BrowserAction => "browser_action",
            EventKind::Token => "token",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "stage" | "step" => EventKind::Stage,
            "tool_call" | "tool_use" => EventKind::ToolCall,
            "tool_result" => EventKind::ToolResult,
            "routing" => EventKind::Routing,
            "handoff" => EventKind::Handoff,
            "source" => EventKind::Source,
            "code_result" => EventKind::CodeResult,
            "error" => EventKind::Error,
            "browser_action" => EventKind::BrowserAction,
            "token" => EventKind::Token,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status carried by stage and browser events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    /// Lenient coercion of producer status strings. Unknown values mean running.
    pub fn coerce(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return StageStatus::Running;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" | "success" | "succeeded" | "finished" => {
                StageStatus::Completed
            }
            "failed" | "failure" | "error" | "cancelled" | "canceled" => StageStatus::Failed,
            "pending" | "queued" | "waiting" => StageStatus::Pending,
            _ => StageStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl AgentEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: None,
            end_timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
        self.end_timestamp = Some(end);
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Stage { .. } => EventKind::Stage,
            EventPayload::ToolCall { .. } => EventKind::ToolCall,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::Routing { .. } => EventKind::Routing,
            EventPayload::Handoff { .. } => EventKind::Handoff,
            EventPayload::Source { .. } => EventKind::Source,
            EventPayload::CodeResult { .. } => EventKind::CodeResult,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::BrowserAction { .. } => EventKind::BrowserAction,
            EventPayload::Token { .. } => EventKind::Token,
        }
    }

    // --- Convenience constructors ---

    pub fn stage(name: impl Into<String>, status: StageStatus) -> Self {
        Self::new(EventPayload::Stage {
            name: name.into(),
            description: String::new(),
            status,
        })
    }

    pub fn stage_with_description(
        name: impl Into<String>,
        status: StageStatus,
        description: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::Stage {
            name: name.into(),
            description: description.into(),
            status,
        })
    }

    pub fn tool_call(tool: impl Into<String>, call_id: Option<&str>, args: Value) -> Self {
        Self::new(EventPayload::ToolCall {
            tool: tool.into(),
            call_id: call_id.map(str::to_string),
            args: args.as_object().cloned().unwrap_or_default(),
        })
    }

    pub fn tool_result(
        tool: impl Into<String>,
        call_id: Option<&str>,
        output: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::ToolResult {
            tool: tool.into(),
            call_id: call_id.map(str::to_string),
            output: output.into(),
        })
    }

    pub fn routing(payload: Value) -> Self {
        Self::new(EventPayload::Routing { payload })
    }

    pub fn handoff(
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::Handoff {
            source_agent: source_agent.into(),
            target_agent: target_agent.into(),
            task: task.into(),
        })
    }

    pub fn source(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(EventPayload::Source {
            title: title.into(),
            url: url.into(),
        })
    }

    pub fn code_result(
        output: impl Into<String>,
        exit_code: Option<i64>,
        error: Option<&str>,
    ) -> Self {
        Self::new(EventPayload::CodeResult {
            output: output.into(),
            exit_code,
            error: error.map(str::to_string),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error {
            message: message.into(),
        })
    }

    pub fn browser_action(
        action: impl Into<String>,
        description: impl Into<String>,
        target: Option<&str>,
        status: StageStatus,
    ) -> Self {
        Self::new(EventPayload::BrowserAction {
            action: action.into(),
            description: description.into(),
            target: target.map(str::to_string),
            status,
        })
    }
}

/// A code run succeeded iff it exited 0, or reported neither an exit code nor
/// an error.
pub fn code_succeeded(exit_code: Option<i64>, error: Option<&str>) -> bool {
    let has_error = error.is_some_and(|e| !e.trim().is_empty());
    exit_code == Some(0) || (!has_error && exit_code.is_none())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Field lookup over a raw producer event. Fields may live on the event
/// object itself or inside a nested `data` object; `data` wins.
struct RawFields<'a> {
    outer: &'a Map<String, Value>,
    data: Option<&'a Map<String, Value>>,
}

impl<'a> RawFields<'a> {
    fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|k| {
            self.data
                .and_then(|d| d.get(*k))
                .or_else(|| self.outer.get(*k))
                .filter(|v| !v.is_null())
        })
    }

    fn str(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .find_map(|k| self.get(&[*k]).and_then(Value::as_str))
    }

    fn string(&self, keys: &[&str]) -> String {
        self.str(keys).unwrap_or_default().to_string()
    }

    /// Like `string`, but non-string values are rendered as JSON text.
    fn text(&self, keys: &[&str]) -> String {
        match self.get(keys) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    fn non_empty(&self, keys: &[&str]) -> Option<String> {
        self.str(keys)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn id(&self, keys: &[&str]) -> Option<String> {
        match self.get(keys)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Normalize one loosely-typed producer event into an [`AgentEvent`].
///
/// Returns `None` for anything that is not an object or carries an unknown
/// kind tag. Never panics on malformed input.
pub fn normalize(value: &Value) -> Option<AgentEvent> {
    let outer = value.as_object()?;
    let fields = RawFields {
        outer,
        data: outer.get("data").and_then(Value::as_object),
    };

    let tag = ["type", "kind", "event"]
        .iter()
        .find_map(|k| outer.get(*k).and_then(Value::as_str))?;
    let kind = EventKind::from_tag(tag)?;

    const CALL_ID: &[&str] = &["call_id", "tool_call_id", "tool_use_id", "id"];
    const TOOL: &[&str] = &["tool", "tool_name", "name"];

    let payload = match kind {
        EventKind::Stage => EventPayload::Stage {
            name: fields.string(&["name", "step", "stage"]),
            description: fields.string(&["description", "message", "detail"]),
            status: StageStatus::coerce(fields.str(&["status", "state"])),
        },
        EventKind::ToolCall => EventPayload::ToolCall {
            tool: fields.string(TOOL),
            call_id: fields.id(CALL_ID),
            args: extract_args(fields.get(&["args", "arguments", "input", "parameters"])),
        },
        EventKind::ToolResult => EventPayload::ToolResult {
            tool: fields.string(TOOL),
            call_id: fields.id(CALL_ID),
            output: fields.text(&["output", "result", "content"]),
        },
        EventKind::Routing => EventPayload::Routing {
            payload: value.clone(),
        },
        EventKind::Handoff => EventPayload::Handoff {
            source_agent: fields.string(&["source_agent", "from", "source"]),
            target_agent: fields.string(&["target_agent", "to", "target"]),
            task: fields.string(&["task", "reason", "message"]),
        },
        EventKind::Source => EventPayload::Source {
            title: fields.string(&["title", "name"]),
            url: fields.string(&["url", "link", "href"]),
        },
        EventKind::CodeResult => EventPayload::CodeResult {
            output: fields.text(&["output", "stdout", "result"]),
            exit_code: fields
                .get(&["exit_code", "exitCode", "returncode"])
                .and_then(Value::as_i64),
            error: fields.non_empty(&["error", "stderr"]),
        },
        EventKind::Error => EventPayload::Error {
            message: fields.text(&["message", "error", "detail"]),
        },
        EventKind::BrowserAction => EventPayload::BrowserAction {
            action: fields.string(&["action", "name"]),
            description: fields.string(&["description", "message"]),
            target: fields.non_empty(&["target", "url", "selector"]),
            status: StageStatus::coerce(fields.str(&["status", "state"])),
        },
        EventKind::Token => EventPayload::Token {
            content: fields.string(&["content", "token", "text"]),
        },
    };

    Some(AgentEvent {
        payload,
        timestamp: fields
            .get(&["timestamp", "ts", "time"])
            .and_then(parse_timestamp),
        end_timestamp: fields
            .get(&["end_timestamp", "endTimestamp"])
            .and_then(parse_timestamp),
    })
}

fn extract_args(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        // Some producers send arguments as an encoded JSON string
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    }
}

/// RFC 3339 strings, or numeric epoch values. Numbers below 1e11 are seconds,
/// anything larger is milliseconds.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let v = n.as_f64()?;
            if !v.is_finite() || v < 0.0 {
                return None;
            }
            let millis = if v < 1e11 { v * 1000.0 } else { v };
            Utc.timestamp_millis_opt(millis.round() as i64).single()
        }
        _ => None,
    }
}

/// Decode a stream of raw producer events: either a JSON array or JSON Lines.
///
/// In JSON Lines mode a line that is not valid JSON is skipped with a warning.
/// Values that do not normalize are dropped in both modes.
pub fn parse_stream(input: &str) -> Result<Vec<AgentEvent>, ProgressError> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)?;
        return Ok(values.iter().filter_map(normalize).collect());
    }

    let mut events = Vec::new();
    for (line_no, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => events.extend(normalize(&value)),
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed event line");
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_stage_with_coerced_status() {
        let event = normalize(&json!({
            "type": "stage",
            "name": "search",
            "description": "Looking things up",
            "status": "in_progress",
        }))
        .unwrap();

        assert_eq!(
            event.payload,
            EventPayload::Stage {
                name: "search".into(),
                description: "Looking things up".into(),
                status: StageStatus::Running,
            }
        );
    }

    #[test]
    fn status_coercion_table() {
        assert_eq!(StageStatus::coerce(Some("done")), StageStatus::Completed);
        assert_eq!(StageStatus::coerce(Some("SUCCESS")), StageStatus::Completed);
        assert_eq!(StageStatus::coerce(Some("error")), StageStatus::Failed);
        assert_eq!(StageStatus::coerce(Some("queued")), StageStatus::Pending);
        assert_eq!(StageStatus::coerce(Some("whatever")), StageStatus::Running);
        assert_eq!(StageStatus::coerce(None), StageStatus::Running);
    }

    #[test]
    fn call_id_falls_back_through_aliases() {
        let event = normalize(&json!({
            "type": "tool_call",
            "tool_name": "web_search",
            "tool_call_id": "call_7",
            "arguments": "{\"query\": \"rust\"}",
        }))
        .unwrap();

        match event.payload {
            EventPayload::ToolCall { tool, call_id, args } => {
                assert_eq!(tool, "web_search");
                assert_eq!(call_id.as_deref(), Some("call_7"));
                assert_eq!(args["query"], "rust");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn reads_fields_from_nested_data() {
        let event = normalize(&json!({
            "event": "tool_result",
            "data": { "tool": "shell", "id": 42, "output": {"ok": true} },
        }))
        .unwrap();

        assert_eq!(
            event.payload,
            EventPayload::ToolResult {
                tool: "shell".into(),
                call_id: Some("42".into()),
                output: "{\"ok\":true}".into(),
            }
        );
    }

    #[test]
    fn unknown_kind_is_ignored() {
        assert!(normalize(&json!({"type": "telemetry", "value": 1})).is_none());
        assert!(normalize(&json!("not an object")).is_none());
        assert!(normalize(&json!({"name": "no tag"})).is_none());
    }

    #[test]
    fn empty_code_error_becomes_none() {
        let event = normalize(&json!({"type": "code_result", "output": "hi", "error": "  "})).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::CodeResult {
                output: "hi".into(),
                exit_code: None,
                error: None,
            }
        );
    }

    #[test]
    fn timestamps_accept_seconds_millis_and_rfc3339() {
        let secs = parse_timestamp(&json!(1_700_000_000)).unwrap();
        let millis = parse_timestamp(&json!(1_700_000_000_000_i64)).unwrap();
        let text = parse_timestamp(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs, text);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(-5)).is_none());
    }

    #[test]
    fn parse_stream_json_lines_skips_bad_lines() {
        let input = r#"{"type":"stage","name":"plan","status":"running"}
this is not json
{"type":"mystery"}

{"type":"error","message":"boom"}"#;

        let events = parse_stream(input).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::Stage);
        assert_eq!(events[1].kind(), EventKind::Error);
    }

    #[test]
    fn parse_stream_array_rejects_invalid_json() {
        assert!(matches!(
            parse_stream("[{\"type\": \"stage\""),
            Err(ProgressError::Decode(_))
        ));
        let events = parse_stream(r#"[{"type":"routing","to":"x"},{"type":"token","content":"a"}]"#)
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn serialized_events_round_trip_through_normalize() {
        let original = AgentEvent::tool_call("read_file", Some("c1"), json!({"path": "a.rs"}));
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(normalize(&value).unwrap(), original);
    }
}
