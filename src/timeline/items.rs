use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::{code_succeeded, AgentEvent, EventPayload, StageStatus};
use crate::group::PlanItem;

/// The four independent replay channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Terminal,
    Plan,
    Browser,
    File,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Terminal, Channel::Plan, Channel::Browser, Channel::File];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Command,
    Output,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLine {
    pub kind: LineKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserActivity {
    pub action: String,
    pub description: String,
    pub target: Option<String>,
    pub status: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileActivity {
    pub path: String,
    /// Tool that touched the file, e.g. `write_file`.
    pub operation: String,
}

/// Anything that can be recorded on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum TimelineItem {
    Terminal(TerminalLine),
    Plan(PlanItem),
    Browser(BrowserActivity),
    File(FileActivity),
}

const SHELL_TOOLS: &[&str] = &[
    "shell",
    "bash",
    "terminal",
    "exec",
    "execute_command",
    "run_command",
    "run_shell",
];
const PATH_ARGS: &[&str] = &["path", "file_path", "filename", "file"];

fn is_shell_tool(tool: &str) -> bool {
    SHELL_TOOLS.contains(&tool.to_ascii_lowercase().as_str())
}

fn file_path(tool: &str, args: &Map<String, Value>) -> Option<String> {
    let lower = tool.to_ascii_lowercase();
    let file_tool = lower.contains("file")
        || matches!(lower.as_str(), "read" | "write" | "edit" | "str_replace_editor");
    if !file_tool {
        return None;
    }
    PATH_ARGS
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
}

impl TimelineItem {
    pub fn channel(&self) -> Channel {
        match self {
            TimelineItem::Terminal(_) => Channel::Terminal,
            TimelineItem::Plan(_) => Channel::Plan,
            TimelineItem::Browser(_) => Channel::Browser,
            TimelineItem::File(_) => Channel::File,
        }
    }

    /// Route an event to the channel it shows up on, if any.
    pub fn from_event(event: &AgentEvent) -> Option<Self> {
        match &event.payload {
            EventPayload::Stage { name, status, .. } => {
                Some(TimelineItem::Plan(PlanItem::new(name.clone(), "stage", *status)))
            }
            EventPayload::ToolCall { tool, args, .. } => {
                if is_shell_tool(tool) {
                    let command = ["command", "cmd", "script"]
                        .iter()
                        .find_map(|k| args.get(*k).and_then(Value::as_str))
                        .unwrap_or(tool);
                    return Some(TimelineItem::Terminal(TerminalLine {
                        kind: LineKind::Command,
                        text: format!("$ {command}"),
                    }));
                }
                if let Some(path) = file_path(tool, args) {
                    return Some(TimelineItem::File(FileActivity {
                        path,
                        operation: tool.clone(),
                    }));
                }
                Some(TimelineItem::Plan(PlanItem::new(
                    tool.clone(),
                    "tool",
                    StageStatus::Running,
                )))
            }
            EventPayload::ToolResult { tool, output, .. } if is_shell_tool(tool) => {
                Some(TimelineItem::Terminal(TerminalLine {
                    kind: LineKind::Output,
                    text: output.clone(),
                }))
            }
            EventPayload::CodeResult {
                output,
                exit_code,
                error,
            } => {
                let failed = !code_succeeded(*exit_code, error.as_deref());
                let text = match error {
                    Some(err) if failed && output.trim().is_empty() => err.clone(),
                    _ => output.clone(),
                };
                Some(TimelineItem::Terminal(TerminalLine {
                    kind: if failed { LineKind::Error } else { LineKind::Output },
                    text,
                }))
            }
            EventPayload::BrowserAction {
                action,
                description,
                target,
                status,
            } => Some(TimelineItem::Browser(BrowserActivity {
                action: action.clone(),
                description: description.clone(),
                target: target.clone(),
                status: *status,
            })),
            _ => None,
        }
    }
}

impl From<TerminalLine> for TimelineItem {
    fn from(line: TerminalLine) -> Self {
        TimelineItem::Terminal(line)
    }
}

impl From<PlanItem> for TimelineItem {
    fn from(item: PlanItem) -> Self {
        TimelineItem::Plan(item)
    }
}

impl From<BrowserActivity> for TimelineItem {
    fn from(activity: BrowserActivity) -> Self {
        TimelineItem::Browser(activity)
    }
}

impl From<FileActivity> for TimelineItem {
    fn from(activity: FileActivity) -> Self {
        TimelineItem::File(activity)
    }
}
