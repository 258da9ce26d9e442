pub mod plan;
pub mod rollup;

pub use plan::{group_consecutive, PlanGroup, PlanItem};
pub use rollup::{
    aggregate, effective_status, rollup_tools, ProgressSummary, StageGroup, ToolGroup,
};
