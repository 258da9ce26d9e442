use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ProgressError;
use crate::events::{parse_stream, AgentEvent};

/// Loads the recorded event stream of a run, for historical replay.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn load(&self, run_id: &str) -> Result<Vec<AgentEvent>, ProgressError>;
}

// --- MemoryEventSource ---

/// Runs held in memory. Useful for tests and for hosts that buffer streams.
#[derive(Default)]
pub struct MemoryEventSource {
    runs: RwLock<HashMap<String, Vec<AgentEvent>>>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(self, run_id: impl Into<String>, events: Vec<AgentEvent>) -> Self {
        self.insert(run_id, events);
        self
    }

    pub fn insert(&self, run_id: impl Into<String>, events: Vec<AgentEvent>) {
        self.runs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(run_id.into(), events);
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn load(&self, run_id: &str) -> Result<Vec<AgentEvent>, ProgressError> {
        self.runs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .cloned()
            .ok_or_else(|| ProgressError::NotFound(run_id.to_string()))
    }
}

// --- FileEventSource ---

/// Reads `<dir>/<run_id>.jsonl`, falling back to `<dir>/<run_id>.json`.
pub struct FileEventSource {
    dir: PathBuf,
}

impl FileEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EventSource for FileEventSource {
    async fn load(&self, run_id: &str) -> Result<Vec<AgentEvent>, ProgressError> {
        if !is_plain_run_id(run_id) {
            warn!(run_id, "rejecting run id outside the log directory");
            return Err(ProgressError::NotFound(run_id.to_string()));
        }
        for ext in ["jsonl", "json"] {
            let path = self.dir.join(format!("{run_id}.{ext}"));
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    let events = parse_stream(&raw)?;
                    debug!(path = %path.display(), events = events.len(), "loaded event log");
                    return Ok(events);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProgressError::NotFound(run_id.to_string()))
    }
}

/// A bare file stem: no separators, no parent references.
fn is_plain_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && !run_id.contains(['/', '\\'])
        && run_id != "."
        && !run_id.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StageStatus;

    #[tokio::test]
    async fn memory_source_returns_stored_run() {
        let source = MemoryEventSource::new()
            .with_run("run-1", vec![AgentEvent::stage("plan", StageStatus::Running)]);
        assert_eq!(source.load("run-1").await.unwrap().len(), 1);
        assert!(matches!(
            source.load("missing").await,
            Err(ProgressError::NotFound(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn file_source_reads_jsonl_and_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = [
            r#"{"type":"stage","name":"search","status":"running","timestamp":"2024-05-01T10:00:00Z"}"#,
            "not json",
            r#"{"type":"tool_call","tool":"web_search","call_id":"c1","args":{"query":"rust"}}"#,
        ]
        .join("\n");
        tokio::fs::write(dir.path().join("run-1.jsonl"), log).await.unwrap();

        let source = FileEventSource::new(dir.path());
        let events = source.load("run-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn file_source_falls_back_to_json_array() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("run-2.json"),
            r#"[{"type":"error","message":"boom"}]"#,
        )
        .await
        .unwrap();

        let events = FileEventSource::new(dir.path()).load("run-2").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn file_source_rejects_ids_outside_its_directory() {
        let root = tempfile::tempdir().unwrap();
        let logs = root.path().join("logs");
        tokio::fs::create_dir(&logs).await.unwrap();
        tokio::fs::write(root.path().join("secret.json"), "[]").await.unwrap();

        let source = FileEventSource::new(&logs);
        for id in ["../secret", "..", "a/b", "a\\b", ""] {
            assert!(
                matches!(source.load(id).await, Err(ProgressError::NotFound(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn file_source_reports_missing_and_malformed_logs() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileEventSource::new(dir.path());
        assert!(matches!(
            source.load("nope").await,
            Err(ProgressError::NotFound(_))
        ));

        tokio::fs::write(dir.path().join("bad.json"), "[{").await.unwrap();
        assert!(matches!(
            source.load("bad").await,
            Err(ProgressError::Decode(_))
        ));
    }
}
