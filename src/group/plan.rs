use serde::{Deserialize, Serialize};

use crate::events::StageStatus;

/// One entry of a flat plan/activity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub status: StageStatus,
}

impl PlanItem {
    pub fn new(name: impl Into<String>, item_type: impl Into<String>, status: StageStatus) -> Self {
        Self {
            name: name.into(),
            item_type: item_type.into(),
            status,
        }
    }
}

/// A run of adjacent plan items sharing `(name, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub status: StageStatus,
    pub count: usize,
    /// Index of the group's first item in the input list.
    pub first_index: usize,
}

/// Failed dominates, then running, then pending; completed only if all are.
fn precedence(status: StageStatus) -> u8 {
    match status {
        StageStatus::Completed => 0,
        StageStatus::Pending => 1,
        StageStatus::Running => 2,
        StageStatus::Failed => 3,
    }
}

/// Merge adjacent items with the same `(name, type)`. Non-adjacent duplicates
/// stay in separate groups.
pub fn group_consecutive(items: &[PlanItem]) -> Vec<PlanGroup> {
    let mut groups: Vec<PlanGroup> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if group.name == item.name && group.item_type == item.item_type => {
                group.count += 1;
                if precedence(item.status) > precedence(group.status) {
                    group.status = item.status;
                }
            }
            _ => groups.push(PlanGroup {
                name: item.name.clone(),
                item_type: item.item_type.clone(),
                status: item.status,
                count: 1,
                first_index: i,
            }),
        }
    }

    groups
}
