pub mod correlator;
pub mod kind;
pub mod label;
pub mod types;

pub use correlator::{fold, StageCorrelator, DEFAULT_SKIP_STAGES};
pub use kind::ToolKind;
pub use label::{resolve_label, LabelCatalog, StaticCatalog};
pub use types::{Detail, DetailKind, DetailStatus, Stage};

/// Truncate to `max` characters, marking the cut with `...`.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}
