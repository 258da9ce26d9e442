use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::index::TimelineIndex;
use super::items::Channel;
use crate::error::ProgressError;

/// Longest real gap honoured between two steps, before speed scaling.
pub const MAX_GAP: Duration = Duration::from_millis(3_000);
/// Shortest delay between two ticks, after speed scaling.
pub const MIN_DELAY: Duration = Duration::from_millis(200);
/// Delay used when there is no gap to measure.
pub const FALLBACK_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum PlaybackSpeed {
    #[default]
    X1,
    X2,
    X4,
}

impl PlaybackSpeed {
    pub fn factor(&self) -> u32 {
        match self {
            PlaybackSpeed::X1 => 1,
            PlaybackSpeed::X2 => 2,
            PlaybackSpeed::X4 => 4,
        }
    }

    /// Cycle 1x -> 2x -> 4x -> 1x.
    pub fn next(&self) -> Self {
        match self {
            PlaybackSpeed::X1 => PlaybackSpeed::X2,
            PlaybackSpeed::X2 => PlaybackSpeed::X4,
            PlaybackSpeed::X4 => PlaybackSpeed::X1,
        }
    }
}

impl TryFrom<u32> for PlaybackSpeed {
    type Error = ProgressError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PlaybackSpeed::X1),
            2 => Ok(PlaybackSpeed::X2),
            4 => Ok(PlaybackSpeed::X4),
            other => Err(ProgressError::InvalidSpeed(other)),
        }
    }
}

impl From<PlaybackSpeed> for u32 {
    fn from(speed: PlaybackSpeed) -> Self {
        speed.factor()
    }
}

impl std::fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Delay before advancing from `current_step` to the next step.
///
/// Uses the real gap between the last visible entry and the next one, capped
/// at [`MAX_GAP`], divided by speed and floored at [`MIN_DELAY`]. Without a
/// gap to measure (empty timeline, nothing visible yet) the fixed fallback
/// divided by speed is used.
pub fn next_delay(index: &TimelineIndex, current_step: usize, speed: PlaybackSpeed) -> Duration {
    let factor = speed.factor();
    let entries = index.entries();
    let gap = current_step
        .checked_sub(1)
        .and_then(|prev| Some((entries.get(prev)?, entries.get(current_step)?)))
        .map(|(prev, next)| {
            (next.timestamp - prev.timestamp)
                .to_std()
                .unwrap_or(Duration::ZERO)
        });

    match gap {
        Some(gap) => (gap.min(MAX_GAP) / factor).max(MIN_DELAY),
        None => FALLBACK_DELAY / factor,
    }
}

/// Cursor over a timeline: current step, play/pause, speed, live flag.
///
/// Pure state machine; [`PlaybackController`](super::PlaybackController)
/// drives it on a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    current_step: usize,
    total_steps: usize,
    playing: bool,
    speed: PlaybackSpeed,
    live: bool,
}

impl PlaybackState {
    /// Starts live, following the end of the timeline.
    pub fn new(total_steps: usize) -> Self {
        Self {
            current_step: total_steps,
            total_steps,
            playing: false,
            speed: PlaybackSpeed::X1,
            live: true,
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    pub fn set_speed(&mut self, speed: PlaybackSpeed) {
        self.speed = speed;
    }

    /// The timeline grew (or was replaced). Live cursors follow the end.
    pub fn set_total(&mut self, total_steps: usize) {
        self.total_steps = total_steps;
        if self.live {
            self.current_step = total_steps;
        } else {
            self.current_step = self.current_step.min(total_steps);
        }
    }

    /// Start playing from the current step; from the start if at the end.
    /// Returns false when there is nothing to play.
    pub fn play(&mut self) -> bool {
        if self.total_steps == 0 {
            return false;
        }
        if self.live || self.current_step >= self.total_steps {
            self.current_step = 0;
        }
        self.live = false;
        self.playing = true;
        true
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Advance one step while playing. Stops at the end; never overshoots.
    pub fn tick(&mut self) -> Option<usize> {
        if !self.playing {
            return None;
        }
        if self.current_step >= self.total_steps {
            self.playing = false;
            return None;
        }
        self.current_step += 1;
        if self.current_step >= self.total_steps {
            self.playing = false;
        }
        Some(self.current_step)
    }

    /// Jump to `step` (clamped) and leave live mode. Returns the channel of
    /// the entry landed on, so a consumer can focus the matching view.
    pub fn seek(&mut self, step: usize, index: &TimelineIndex) -> Option<Channel> {
        self.live = false;
        self.current_step = step.min(self.total_steps);
        index.landing_entry(self.current_step).map(|e| e.channel)
    }

    pub fn step_forward(&mut self, index: &TimelineIndex) -> Option<Channel> {
        let from = if self.live { self.total_steps } else { self.current_step };
        self.seek(from.saturating_add(1), index)
    }

    pub fn step_back(&mut self, index: &TimelineIndex) -> Option<Channel> {
        let from = if self.live { self.total_steps } else { self.current_step };
        self.seek(from.saturating_sub(1), index)
    }

    /// Back to following the stream; the step cursor no longer applies.
    pub fn go_live(&mut self) {
        self.playing = false;
        self.live = true;
        self.current_step = self.total_steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StageStatus;
    use crate::group::PlanItem;
    use crate::timeline::items::{LineKind, TerminalLine};
    use chrono::{DateTime, TimeZone, Utc};

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn index_with_gaps(offsets_ms: &[i64]) -> TimelineIndex {
        let mut index = TimelineIndex::new();
        for (i, ms) in offsets_ms.iter().enumerate() {
            if i % 2 == 0 {
                index.append(
                    TerminalLine {
                        kind: LineKind::Output,
                        text: format!("line {i}"),
                    },
                    at_millis(*ms),
                );
            } else {
                index.append(PlanItem::new("step", "tool", StageStatus::Running), at_millis(*ms));
            }
        }
        index
    }

    #[test]
    fn speed_parsing() {
        assert_eq!(PlaybackSpeed::try_from(2).unwrap(), PlaybackSpeed::X2);
        assert!(matches!(
            PlaybackSpeed::try_from(3),
            Err(ProgressError::InvalidSpeed(3))
        ));
        assert_eq!(PlaybackSpeed::X4.to_string(), "4x");
        assert_eq!(PlaybackSpeed::X4.next(), PlaybackSpeed::X1);
    }

    #[test]
    fn delay_follows_real_gaps() {
        let index = index_with_gaps(&[0, 1_000, 9_000, 9_050]);
        assert_eq!(next_delay(&index, 1, PlaybackSpeed::X1), Duration::from_millis(1_000));
        assert_eq!(next_delay(&index, 1, PlaybackSpeed::X2), Duration::from_millis(500));
        // Capped at 3s before scaling.
        assert_eq!(next_delay(&index, 2, PlaybackSpeed::X1), Duration::from_millis(3_000));
        assert_eq!(next_delay(&index, 2, PlaybackSpeed::X4), Duration::from_millis(750));
        // Floored at 200ms.
        assert_eq!(next_delay(&index, 3, PlaybackSpeed::X1), MIN_DELAY);
    }

    #[test]
    fn delay_falls_back_without_gap() {
        let empty = TimelineIndex::new();
        assert_eq!(next_delay(&empty, 0, PlaybackSpeed::X1), Duration::from_millis(800));
        assert_eq!(next_delay(&empty, 0, PlaybackSpeed::X2), Duration::from_millis(400));

        let index = index_with_gaps(&[0, 10]);
        assert_eq!(next_delay(&index, 0, PlaybackSpeed::X4), Duration::from_millis(200));
    }

    #[test]
    fn out_of_order_timestamps_use_floor() {
        let index = index_with_gaps(&[5_000, 1_000]);
        assert_eq!(next_delay(&index, 1, PlaybackSpeed::X1), MIN_DELAY);
    }

    #[test]
    fn tick_never_passes_total() {
        let mut state = PlaybackState::new(2);
        assert!(state.play());
        assert_eq!(state.current_step(), 0);
        assert_eq!(state.tick(), Some(1));
        assert_eq!(state.tick(), Some(2));
        assert!(!state.is_playing());
        assert_eq!(state.tick(), None);
        assert_eq!(state.current_step(), 2);
    }

    #[test]
    fn play_on_empty_timeline_does_nothing() {
        let mut state = PlaybackState::new(0);
        assert!(!state.play());
        assert!(!state.is_playing());
        assert!(state.is_live());
    }

    #[test]
    fn seek_reports_landing_channel_and_clamps() {
        let index = index_with_gaps(&[0, 1, 2]);
        let mut state = PlaybackState::new(index.total_steps());
        assert_eq!(state.seek(2, &index), Some(Channel::Plan));
        assert!(!state.is_live());
        assert_eq!(state.seek(99, &index), Some(Channel::Terminal));
        assert_eq!(state.current_step(), 3);
        assert_eq!(state.seek(0, &index), None);
    }

    #[test]
    fn stepping_from_live_starts_at_the_end() {
        let index = index_with_gaps(&[0, 1, 2]);
        let mut state = PlaybackState::new(index.total_steps());
        assert_eq!(state.step_back(&index), Some(Channel::Plan));
        assert_eq!(state.current_step(), 2);
        assert_eq!(state.step_forward(&index), Some(Channel::Terminal));
        assert_eq!(state.step_forward(&index), Some(Channel::Terminal));
        assert_eq!(state.current_step(), 3);
    }

    #[test]
    fn live_cursor_follows_growth() {
        let mut state = PlaybackState::new(3);
        state.set_total(5);
        assert_eq!(state.current_step(), 5);

        state.pause();
        let index = index_with_gaps(&[0, 1, 2, 3, 4]);
        state.seek(2, &index);
        state.set_total(7);
        assert_eq!(state.current_step(), 2);

        state.go_live();
        assert!(state.is_live());
        assert_eq!(state.current_step(), 7);
    }
}
