pub mod controller;
pub mod index;
pub mod items;
pub mod playback;

pub use controller::{PlaybackController, PlaybackFrame};
pub use index::{ReplayView, SharedTimeline, TimelineEntry, TimelineIndex, VisibleSlice};
pub use items::{BrowserActivity, Channel, FileActivity, LineKind, TerminalLine, TimelineItem};
pub use playback::{next_delay, PlaybackSpeed, PlaybackState, FALLBACK_DELAY, MAX_GAP, MIN_DELAY};
