use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::index::{SharedTimeline, TimelineIndex, VisibleSlice};
use super::items::Channel;
use super::playback::{next_delay, PlaybackSpeed, PlaybackState};

/// What a replay view should render right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackFrame {
    pub step: usize,
    pub total: usize,
    pub live: bool,
    pub playing: bool,
    pub speed: PlaybackSpeed,
    pub slice: VisibleSlice,
    /// Channel of the entry the cursor last landed on.
    pub channel: Option<Channel>,
}

struct Inner {
    state: PlaybackState,
    /// Cancels the pending tick of the current play session.
    token: CancellationToken,
}

/// Drives a [`PlaybackState`] over a [`SharedTimeline`] on a tokio task.
///
/// Every pause, seek, or go-live cancels the running session's token while
/// holding the state lock, and each tick re-checks the token under that same
/// lock, so a tick that was already sleeping can never move the cursor.
#[derive(Clone)]
pub struct PlaybackController {
    timeline: SharedTimeline,
    inner: Arc<Mutex<Inner>>,
    frames: Arc<watch::Sender<PlaybackFrame>>,
}

impl PlaybackController {
    pub fn new(timeline: SharedTimeline) -> Self {
        let state = PlaybackState::new(timeline.total_steps());
        let first = render(&timeline, &state, None);
        let (frames, _) = watch::channel(first);
        Self {
            timeline,
            inner: Arc::new(Mutex::new(Inner {
                state,
                token: CancellationToken::new(),
            })),
            frames: Arc::new(frames),
        }
    }

    pub fn with_speed(self, speed: PlaybackSpeed) -> Self {
        self.set_speed(speed);
        self
    }

    /// Receive a frame after every cursor change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackFrame> {
        self.frames.subscribe()
    }

    /// The latest published frame.
    pub fn frame(&self) -> PlaybackFrame {
        *self.frames.borrow()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().state.is_playing()
    }

    /// Start automatic playback on the current tokio runtime.
    /// Returns false when the timeline is empty.
    pub fn play(&self) -> bool {
        let token = {
            let mut inner = self.lock();
            inner.token.cancel();
            inner.state.set_total(self.timeline.total_steps());
            if !inner.state.play() {
                return false;
            }
            inner.token = CancellationToken::new();
            self.publish(&inner.state, None);
            inner.token.clone()
        };

        info!(speed = %self.lock().state.speed(), "playback started");
        let controller = self.clone();
        tokio::spawn(async move { controller.run(token).await });
        true
    }

    pub fn pause(&self) {
        let mut inner = self.lock();
        inner.token.cancel();
        if inner.state.is_playing() {
            info!(step = inner.state.current_step(), "playback paused");
        }
        inner.state.pause();
        self.publish(&inner.state, None);
    }

    /// Return to following the stream. Cancels any pending tick.
    pub fn go_live(&self) {
        let mut inner = self.lock();
        inner.token.cancel();
        inner.state.set_total(self.timeline.total_steps());
        inner.state.go_live();
        info!("playback back to live");
        self.publish(&inner.state, None);
    }

    /// Jump to `step`, stopping playback. Returns the landing channel.
    pub fn seek(&self, step: usize) -> Option<Channel> {
        self.reposition(|state, index| state.seek(step, index))
    }

    pub fn step_forward(&self) -> Option<Channel> {
        self.reposition(PlaybackState::step_forward)
    }

    pub fn step_back(&self) -> Option<Channel> {
        self.reposition(PlaybackState::step_back)
    }

    pub fn set_speed(&self, speed: PlaybackSpeed) {
        let mut inner = self.lock();
        inner.state.set_speed(speed);
        self.publish(&inner.state, None);
    }

    /// The timeline grew; refresh totals (and the live frame).
    pub fn refresh(&self) {
        let mut inner = self.lock();
        inner.state.set_total(self.timeline.total_steps());
        self.publish(&inner.state, None);
    }

    fn reposition(
        &self,
        f: impl FnOnce(&mut PlaybackState, &TimelineIndex) -> Option<Channel>,
    ) -> Option<Channel> {
        let mut inner = self.lock();
        inner.token.cancel();
        inner.state.pause();
        let channel = self.timeline.read(|index| {
            inner.state.set_total(index.total_steps());
            f(&mut inner.state, index)
        });
        self.publish(&inner.state, channel);
        channel
    }

    async fn run(self, token: CancellationToken) {
        loop {
            let delay = {
                let inner = self.lock();
                if token.is_cancelled() || !inner.state.is_playing() {
                    return;
                }
                let (step, speed) = (inner.state.current_step(), inner.state.speed());
                self.timeline.read(|index| next_delay(index, step, speed))
            };

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut inner = self.lock();
            // Cancelled while the tick was in flight.
            if token.is_cancelled() {
                debug!("discarding stale playback tick");
                return;
            }
            inner.state.set_total(self.timeline.total_steps());
            let Some(step) = inner.state.tick() else {
                self.publish(&inner.state, None);
                return;
            };
            let channel = self
                .timeline
                .read(|index| index.landing_entry(step).map(|e| e.channel));
            self.publish(&inner.state, channel);

            if !inner.state.is_playing() {
                info!(step, "playback finished");
                return;
            }
        }
    }

    fn publish(&self, state: &PlaybackState, channel: Option<Channel>) {
        self.frames.send_replace(render(&self.timeline, state, channel));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn render(
    timeline: &SharedTimeline,
    state: &PlaybackState,
    channel: Option<Channel>,
) -> PlaybackFrame {
    PlaybackFrame {
        step: state.current_step(),
        total: state.total_steps(),
        live: state.is_live(),
        playing: state.is_playing(),
        speed: state.speed(),
        slice: timeline.visible_slice(state.current_step(), state.is_live()),
        channel,
    }
}
