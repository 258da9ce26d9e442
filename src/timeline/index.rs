use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::items::{BrowserActivity, Channel, FileActivity, TerminalLine, TimelineItem};
use crate::group::PlanItem;

/// One recorded item: which channel, and where it sits in that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub channel: Channel,
    /// Length of the channel's list just before this item was appended.
    pub data_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// How much of each channel is visible at a replay position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleSlice {
    pub terminal: usize,
    pub plan: usize,
    pub browser: bool,
    pub file: bool,
    /// Latest visible browser item, when `browser` is set.
    pub browser_index: Option<usize>,
    /// Latest visible file item, when `file` is set.
    pub file_index: Option<usize>,
}

/// Borrowed per-channel view of what existed at a replay position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayView<'a> {
    pub terminal: &'a [TerminalLine],
    pub plan: &'a [PlanItem],
    pub browser: Option<&'a BrowserActivity>,
    pub file: Option<&'a FileActivity>,
}

/// Four append-only channel lists plus one arrival-ordered entry list across
/// all of them. Entries are never mutated or removed; queries are pure.
#[derive(Debug, Clone, Default)]
pub struct TimelineIndex {
    terminal: Vec<TerminalLine>,
    plan: Vec<PlanItem>,
    browser: Vec<BrowserActivity>,
    file: Vec<FileActivity>,
    entries: Vec<TimelineEntry>,
}

impl TimelineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item on its channel and in the combined timeline.
    pub fn append(&mut self, item: impl Into<TimelineItem>, timestamp: DateTime<Utc>) -> TimelineEntry {
        let item = item.into();
        let channel = item.channel();
        let entry = TimelineEntry {
            channel,
            data_index: self.channel_len(channel),
            timestamp,
        };
        match item {
            TimelineItem::Terminal(line) => self.terminal.push(line),
            TimelineItem::Plan(plan) => self.plan.push(plan),
            TimelineItem::Browser(activity) => self.browser.push(activity),
            TimelineItem::File(activity) => self.file.push(activity),
        }
        self.entries.push(entry);
        entry
    }

    pub fn channel_len(&self, channel: Channel) -> usize {
        match channel {
            Channel::Terminal => self.terminal.len(),
            Channel::Plan => self.plan.len(),
            Channel::Browser => self.browser.len(),
            Channel::File => self.file.len(),
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Number of replay steps: one per recorded entry.
    pub fn total_steps(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry that becomes visible when stepping onto `step`.
    pub fn landing_entry(&self, step: usize) -> Option<&TimelineEntry> {
        step.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Visibility after the first `step` entries (or everything when live).
    /// Steps past the end behave like the end.
    pub fn visible_slice(&self, step: usize, live: bool) -> VisibleSlice {
        if live {
            return VisibleSlice {
                terminal: self.terminal.len(),
                plan: self.plan.len(),
                browser: !self.browser.is_empty(),
                file: !self.file.is_empty(),
                browser_index: self.browser.len().checked_sub(1),
                file_index: self.file.len().checked_sub(1),
            };
        }

        let mut max: [Option<usize>; 4] = [None; 4];
        for entry in self.entries.iter().take(step) {
            let slot = &mut max[channel_slot(entry.channel)];
            *slot = Some(slot.map_or(entry.data_index, |m| m.max(entry.data_index)));
        }
        let len = |channel: Channel| max[channel_slot(channel)].map_or(0, |m| m + 1);

        VisibleSlice {
            terminal: len(Channel::Terminal),
            plan: len(Channel::Plan),
            browser: max[channel_slot(Channel::Browser)].is_some(),
            file: max[channel_slot(Channel::File)].is_some(),
            browser_index: max[channel_slot(Channel::Browser)],
            file_index: max[channel_slot(Channel::File)],
        }
    }

    /// The items a renderer should show at `step`.
    pub fn view(&self, step: usize, live: bool) -> ReplayView<'_> {
        let slice = self.visible_slice(step, live);
        ReplayView {
            terminal: &self.terminal[..slice.terminal],
            plan: &self.plan[..slice.plan],
            browser: slice.browser_index.and_then(|i| self.browser.get(i)),
            file: slice.file_index.and_then(|i| self.file.get(i)),
        }
    }
}

fn channel_slot(channel: Channel) -> usize {
    match channel {
        Channel::Terminal => 0,
        Channel::Plan => 1,
        Channel::Browser => 2,
        Channel::File => 3,
    }
}

/// A [`TimelineIndex`] shared between one appending producer and readers.
#[derive(Debug, Clone, Default)]
pub struct SharedTimeline {
    inner: Arc<RwLock<TimelineIndex>>,
}

impl SharedTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, item: impl Into<TimelineItem>, timestamp: DateTime<Utc>) -> TimelineEntry {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(item, timestamp)
    }

    /// Run `f` against a consistent read of the index.
    pub fn read<R>(&self, f: impl FnOnce(&TimelineIndex) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    pub fn total_steps(&self) -> usize {
        self.read(TimelineIndex::total_steps)
    }

    pub fn visible_slice(&self, step: usize, live: bool) -> VisibleSlice {
        self.read(|index| index.visible_slice(step, live))
    }

    /// Owned copy of the current index.
    pub fn snapshot(&self) -> TimelineIndex {
        self.read(TimelineIndex::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StageStatus;
    use crate::timeline::items::LineKind;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn line(text: &str) -> TerminalLine {
        TerminalLine {
            kind: LineKind::Output,
            text: text.into(),
        }
    }

    fn browse(action: &str) -> BrowserActivity {
        BrowserActivity {
            action: action.into(),
            description: String::new(),
            target: None,
            status: StageStatus::Completed,
        }
    }

    /// terminal, plan, terminal, browser, terminal, file
    fn sample() -> TimelineIndex {
        let mut index = TimelineIndex::new();
        index.append(line("$ ls"), ts(1));
        index.append(PlanItem::new("search", "stage", StageStatus::Running), ts(2));
        index.append(line("a.rs"), ts(3));
        index.append(browse("navigate"), ts(4));
        index.append(line("b.rs"), ts(5));
        index.append(
            FileActivity {
                path: "notes.md".into(),
                operation: "write_file".into(),
            },
            ts(6),
        );
        index
    }

    #[test]
    fn append_records_per_channel_index() {
        let index = sample();
        let terminal: Vec<_> = index
            .entries()
            .iter()
            .filter(|e| e.channel == Channel::Terminal)
            .map(|e| e.data_index)
            .collect();
        assert_eq!(terminal, [0, 1, 2]);
        assert_eq!(index.entries()[3].channel, Channel::Browser);
        assert_eq!(index.entries()[3].data_index, 0);
        assert_eq!(index.total_steps(), 6);
    }

    #[test]
    fn channel_lengths_sum_to_total_steps() {
        let index = sample();
        let lengths: Vec<_> = Channel::ALL.iter().map(|c| index.channel_len(*c)).collect();
        assert_eq!(lengths, [3, 1, 1, 1]);
        assert_eq!(lengths.iter().sum::<usize>(), index.total_steps());
    }

    #[test]
    fn visible_slice_at_steps() {
        let index = sample();
        assert_eq!(index.visible_slice(0, false), VisibleSlice::default());

        let at3 = index.visible_slice(3, false);
        assert_eq!(at3.terminal, 2);
        assert_eq!(at3.plan, 1);
        assert!(!at3.browser);
        assert!(!at3.file);

        let at4 = index.visible_slice(4, false);
        assert!(at4.browser);
        assert_eq!(at4.browser_index, Some(0));
    }

    #[test]
    fn replay_slice_is_monotonic_and_ends_at_live() {
        let index = sample();
        let mut previous = 0;
        for step in 0..=index.total_steps() {
            let terminal = index.visible_slice(step, false).terminal;
            assert!(terminal >= previous);
            previous = terminal;
        }
        assert_eq!(
            index.visible_slice(index.total_steps(), false),
            index.visible_slice(0, true)
        );
    }

    #[test]
    fn queries_are_order_independent() {
        let index = sample();
        let forward: Vec<_> = (0..=6).map(|s| index.visible_slice(s, false)).collect();
        let backward: Vec<_> = (0..=6).rev().map(|s| index.visible_slice(s, false)).collect();
        assert_eq!(forward, backward.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn step_past_end_is_clamped() {
        let index = sample();
        assert_eq!(index.visible_slice(100, false), index.visible_slice(6, false));
    }

    #[test]
    fn view_borrows_visible_items() {
        let index = sample();
        let view = index.view(5, false);
        let texts: Vec<_> = view.terminal.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["$ ls", "a.rs", "b.rs"]);
        assert_eq!(view.browser.map(|b| b.action.as_str()), Some("navigate"));
        assert!(view.file.is_none());
    }

    #[test]
    fn landing_entry_reports_channel() {
        let index = sample();
        assert!(index.landing_entry(0).is_none());
        assert_eq!(index.landing_entry(4).map(|e| e.channel), Some(Channel::Browser));
        assert!(index.landing_entry(7).is_none());
    }

    #[test]
    fn shared_timeline_accepts_concurrent_producers() {
        let shared = SharedTimeline::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        shared.append(line(&format!("{i}-{n}")), ts(n));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.total_steps(), 100);
        let mut indices: Vec<_> = snapshot.entries().iter().map(|e| e.data_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..100).collect::<Vec<_>>());
    }
}
