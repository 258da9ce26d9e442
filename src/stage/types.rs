use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::StageStatus;

/// Display category of a [`Detail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    Info,
    Tool,
    Search,
    Error,
    ImageGenerate,
    ImageAnalyze,
    Source,
    Code,
}

impl DetailKind {
    /// Kinds that originate from a tool invocation and roll up into tool groups.
    pub fn is_tool_like(&self) -> bool {
        matches!(
            self,
            DetailKind::Tool | DetailKind::Search | DetailKind::ImageGenerate | DetailKind::ImageAnalyze
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    Running,
    Completed,
    Failed,
}

/// A single sub-event attached to a [`Stage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub id: String,
    pub text: String,
    pub kind: DetailKind,
    /// `None` means purely informational.
    pub status: Option<DetailStatus>,
    /// Copied from the originating tool call. Never changes once set.
    pub correlation_id: Option<String>,
    /// Tool name, for tool-like details.
    pub tool: Option<String>,
    /// Skill identifier when the tool is a skill-invocation wrapper.
    pub skill_id: Option<String>,
    /// Link target, for source details.
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Detail {
    pub fn info(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind: DetailKind::Info,
            status: None,
            correlation_id: None,
            tool: None,
            skill_id: None,
            url: None,
            created_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == Some(DetailStatus::Running)
    }
}

/// A named phase of agent execution with its ordered details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stable key: `stage:<name>` for named stages, synthesized otherwise.
    pub id: String,
    pub name: String,
    pub status: StageStatus,
    pub label: String,
    pub details: Vec<Detail>,
    pub created_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Stage {
    /// Number of tool-like details in this stage.
    pub fn tool_count(&self) -> usize {
        self.details.iter().filter(|d| d.kind.is_tool_like()).count()
    }
}
