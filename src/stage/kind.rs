use serde_json::{Map, Value};

use super::types::DetailKind;

/// Tool names that wrap a skill invocation. Their rollup key includes the skill id.
const SKILL_WRAPPERS: &[&str] = &["invoke_skill", "use_skill", "run_skill"];

/// Coarse bucket a tool falls into, used for detail kinds and implicit stage names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Search,
    ImageGenerate,
    ImageAnalyze,
    Other,
}

impl ToolKind {
    pub fn infer(tool: &str) -> Self {
        let name = tool.to_ascii_lowercase();
        match name.as_str() {
            "generate_image" | "image_generate" | "image_generation" | "text_to_image"
            | "create_image" => ToolKind::ImageGenerate,
            "analyze_image" | "image_analyze" | "image_analysis" | "describe_image" | "vision" => {
                ToolKind::ImageAnalyze
            }
            _ if name.contains("search") || name.starts_with("web_") || name == "browse" => {
                ToolKind::Search
            }
            _ => ToolKind::Other,
        }
    }

    pub fn detail_kind(&self) -> DetailKind {
        match self {
            ToolKind::Search => DetailKind::Search,
            ToolKind::ImageGenerate => DetailKind::ImageGenerate,
            ToolKind::ImageAnalyze => DetailKind::ImageAnalyze,
            ToolKind::Other => DetailKind::Tool,
        }
    }

    /// Name given to a stage synthesized around a tool call of this kind.
    pub fn stage_name(&self) -> &'static str {
        match self {
            ToolKind::Search => "search",
            ToolKind::ImageGenerate => "image_generate",
            ToolKind::ImageAnalyze => "image_analyze",
            ToolKind::Other => "tool",
        }
    }
}

pub fn is_skill_wrapper(tool: &str) -> bool {
    SKILL_WRAPPERS.contains(&tool)
}

/// Skill id carried in the arguments of a skill-invocation wrapper.
pub fn skill_id(tool: &str, args: &Map<String, Value>) -> Option<String> {
    if !is_skill_wrapper(tool) {
        return None;
    }
    ["skill_id", "skill", "skill_name", "name"]
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// One-line summary of what a tool call is doing, from its most telling argument.
pub fn describe_call(tool: &str, args: &Map<String, Value>) -> String {
    const TELLING: &[&str] = &["query", "q", "command", "cmd", "path", "file_path", "url", "prompt"];
    TELLING
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|arg| format!("{tool}: {arg}"))
        .unwrap_or_else(|| tool.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn infers_tool_buckets() {
        assert_eq!(ToolKind::infer("web_search"), ToolKind::Search);
        assert_eq!(ToolKind::infer("SearchDocs"), ToolKind::Search);
        assert_eq!(ToolKind::infer("web_fetch"), ToolKind::Search);
        assert_eq!(ToolKind::infer("generate_image"), ToolKind::ImageGenerate);
        assert_eq!(ToolKind::infer("analyze_image"), ToolKind::ImageAnalyze);
        assert_eq!(ToolKind::infer("read_file"), ToolKind::Other);
    }

    #[test]
    fn skill_id_only_for_wrappers() {
        let a = args(json!({"skill_id": "pdf-report"}));
        assert_eq!(skill_id("invoke_skill", &a).as_deref(), Some("pdf-report"));
        assert_eq!(skill_id("read_file", &a), None);
        assert_eq!(skill_id("invoke_skill", &args(json!({"skill_id": " "}))), None);
    }

    #[test]
    fn describe_call_prefers_telling_argument() {
        assert_eq!(
            describe_call("shell", &args(json!({"command": "ls -la", "timeout": 5}))),
            "shell: ls -la"
        );
        assert_eq!(describe_call("noop", &Map::new()), "noop");
    }
}
