#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to decode event stream: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported playback speed: {0}x")]
    InvalidSpeed(u32),
    #[error("event log error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event log not found: {0}")]
    NotFound(String),
}
