use std::collections::HashMap;

use crate::events::StageStatus;

/// Source of translated stage labels, keyed by `(name, status)`.
pub trait LabelCatalog: Send + Sync {
    fn translate(&self, name: &str, status: StageStatus) -> Option<String>;
}

/// In-memory catalog. Starts empty, so every label falls back to the
/// capitalized stage name until entries are added.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<(String, StageStatus), String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(
        mut self,
        name: impl Into<String>,
        status: StageStatus,
        text: impl Into<String>,
    ) -> Self {
        self.entries.insert((name.into(), status), text.into());
        self
    }
}

impl LabelCatalog for StaticCatalog {
    fn translate(&self, name: &str, status: StageStatus) -> Option<String> {
        self.entries.get(&(name.to_string(), status)).cloned()
    }
}

/// Resolve a stage label: `(name, status)`, then `(default, status)`, then the
/// capitalized name. Pure in `(name, status)`; re-run whenever status changes.
pub fn resolve_label(catalog: &dyn LabelCatalog, name: &str, status: StageStatus) -> String {
    catalog
        .translate(name, status)
        .or_else(|| catalog.translate("default", status))
        .unwrap_or_else(|| capitalize(name))
}

fn capitalize(name: &str) -> String {
    let spaced = name.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_translation_wins() {
        let catalog = StaticCatalog::new()
            .with_label("search", StageStatus::Running, "Searching")
            .with_label("default", StageStatus::Running, "Working");
        assert_eq!(resolve_label(&catalog, "search", StageStatus::Running), "Searching");
    }

    #[test]
    fn falls_back_to_default_translation() {
        let catalog = StaticCatalog::new().with_label("default", StageStatus::Completed, "Done");
        assert_eq!(resolve_label(&catalog, "write", StageStatus::Completed), "Done");
        assert_eq!(resolve_label(&catalog, "write", StageStatus::Running), "Write");
    }

    #[test]
    fn capitalized_fallback() {
        let catalog = StaticCatalog::new();
        assert_eq!(resolve_label(&catalog, "image_generate", StageStatus::Running), "Image generate");
        assert_eq!(resolve_label(&catalog, "", StageStatus::Running), "");
    }
}
