//! The playback controller and its virtual wall-clock
//!
//! No feedback arrives from the remote player, so playback is simulated
//! with timers against the wall clock: a track-end timer advances the
//! queue, a notification-delay timer emits `TrackStarted` late enough for
//! listeners to land on a player that already switched tracks, and a
//! depletion timer re-checks remaining playtime against the refill
//! threshold.
//!
//! Timers poll a recomputed deadline every 100 ms instead of sleeping
//! once, because a monotonic one-shot drifts against the remote player's
//! perceived time over a long session. All clock state is held as
//! `chrono::DateTime<Utc>`, which carries no monotonic component, so
//! stored instants subtract as pure wall-clock differences.

use super::{PlaybackEvent, PlaybackState};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as WallDelta, Utc};
use jbx_common::track::QueuedTrack;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 16;
const TIMER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Controller configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Remaining-queue duration below which `QueueDepleting` fires
    pub depletion_threshold: Duration,
    /// Delay between conceptual track start and `TrackStarted` emission
    pub notification_delay: Duration,
    /// Start offset compensating for catalog-client drift
    pub gap_correction: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            depletion_threshold: Duration::from_secs(30),
            notification_delay: Duration::from_secs(5),
            gap_correction: Duration::from_millis(100),
        }
    }
}

/// Queue, history, current track, and virtual clock, all behind one lock
struct Inner {
    queue: VecDeque<QueuedTrack>,
    played: Vec<QueuedTrack>,
    current: Option<QueuedTrack>,
    state: PlaybackState,

    /// Conceptual start instant of the current track (includes gap)
    start_time: DateTime<Utc>,
    /// When the `TrackStarted` notification is due; None once emitted
    notification_time: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    /// Accumulated pause time, subtracted from elapsed
    paused_elapsed: WallDelta,

    track_timer: Option<CancellationToken>,
    depletion_timer: Option<CancellationToken>,
    notification_timer: Option<CancellationToken>,

    /// Set after `QueueDepleting` fired; reset by any enqueue
    depletion_notified: bool,
}

impl Inner {
    fn cancel_timer(slot: &mut Option<CancellationToken>) {
        if let Some(token) = slot.take() {
            token.cancel();
        }
    }
}

/// Shared core: the timer tasks hold an `Arc` of this
struct Core {
    inner: Mutex<Inner>,
    event_tx: mpsc::Sender<PlaybackEvent>,
    config: PlaybackConfig,
    shutdown: CancellationToken,
    /// Self-reference handed to timer callbacks; always upgradable while
    /// a method borrow of the core exists
    this: std::sync::Weak<Core>,
}

/// Playback controller with an internal queue and virtual clock
pub struct Controller {
    core: Arc<Core>,
    events_rx: Mutex<Option<mpsc::Receiver<PlaybackEvent>>>,
}

impl Controller {
    pub fn new(config: PlaybackConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let core = Arc::new_cyclic(|this| Core {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                played: Vec::new(),
                current: None,
                state: PlaybackState::Idle,
                start_time: Utc::now(),
                notification_time: None,
                paused_at: None,
                paused_elapsed: WallDelta::zero(),
                track_timer: None,
                depletion_timer: None,
                notification_timer: None,
                depletion_notified: false,
            }),
            event_tx,
            config,
            shutdown: CancellationToken::new(),
            this: this.clone(),
        });
        Self {
            core,
            events_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver. Yields `Some` exactly once; the single
    /// consumer discipline keeps downstream ordering equal to emission
    /// order.
    pub fn take_events(&self) -> Option<mpsc::Receiver<PlaybackEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Start playback. A no-op while playing; resumes when paused;
    /// otherwise dequeues and plays the next track.
    pub fn play(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => self.core.resume_locked(&mut inner),
            PlaybackState::Idle => self.core.play_next_locked(&mut inner),
        }
    }

    /// Pause the current track, freezing the virtual clock.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().unwrap();
        if inner.current.is_none() {
            return Err(Error::NoTrack);
        }
        if inner.state != PlaybackState::Playing {
            return Err(Error::NotPlaying);
        }

        Inner::cancel_timer(&mut inner.track_timer);
        Inner::cancel_timer(&mut inner.depletion_timer);
        Inner::cancel_timer(&mut inner.notification_timer);

        let now = Utc::now();
        // Still inside the pre-start gap: bank the unelapsed gap so the
        // track does not lose playtime, and clamp the start to now.
        if now < inner.start_time {
            inner.paused_elapsed = inner.paused_elapsed + (inner.start_time - now);
            inner.start_time = now;
        }

        inner.paused_at = Some(now);
        inner.state = PlaybackState::Paused;

        let track = inner.current.clone();
        self.core.send_event(PlaybackEvent::StateChanged {
            track,
            state: inner.state,
        });
        Ok(())
    }

    /// Resume paused playback, rescheduling timers from the derived
    /// remaining duration.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().unwrap();
        self.core.resume_locked(&mut inner)
    }

    /// Skip the current track and advance to the next.
    pub fn skip(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().unwrap();
        if inner.current.is_none() {
            return Err(Error::NoTrack);
        }

        Inner::cancel_timer(&mut inner.track_timer);
        Inner::cancel_timer(&mut inner.notification_timer);

        let skipped = inner.current.take();
        inner.state = PlaybackState::Idle;
        inner.paused_at = None;
        inner.paused_elapsed = WallDelta::zero();
        inner.notification_time = None;

        if let Some(track) = skipped {
            self.core.send_event(PlaybackEvent::TrackSkipped { track });
        }

        self.core.play_next_locked(&mut inner)
    }

    /// Stop playback completely and drop the current track.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.core.inner.lock().unwrap();

        Inner::cancel_timer(&mut inner.track_timer);
        Inner::cancel_timer(&mut inner.depletion_timer);
        Inner::cancel_timer(&mut inner.notification_timer);

        inner.current = None;
        inner.state = PlaybackState::Idle;
        inner.paused_at = None;
        inner.paused_elapsed = WallDelta::zero();
        inner.notification_time = None;
        Ok(())
    }

    /// Append a track to the queue.
    pub fn enqueue(&self, qt: QueuedTrack) {
        let mut inner = self.core.inner.lock().unwrap();
        inner.queue.push_back(qt);
        inner.depletion_notified = false;
        self.core.check_depletion_locked(&mut inner);
    }

    /// Append multiple tracks to the queue.
    pub fn enqueue_multiple(&self, tracks: Vec<QueuedTrack>) {
        let mut inner = self.core.inner.lock().unwrap();
        inner.queue.extend(tracks);
        inner.depletion_notified = false;
        self.core.check_depletion_locked(&mut inner);
    }

    /// Remove and return every queued (not yet playing) track.
    pub fn clear_queue(&self) -> Vec<QueuedTrack> {
        let mut inner = self.core.inner.lock().unwrap();
        inner.queue.drain(..).collect()
    }

    pub fn state(&self) -> PlaybackState {
        self.core.inner.lock().unwrap().state
    }

    pub fn current_track(&self) -> Option<QueuedTrack> {
        self.core.inner.lock().unwrap().current.clone()
    }

    /// Remaining playback time of the current track. Full duration while
    /// still inside the pre-start gap; zero when nothing is playing.
    pub fn remaining_duration(&self) -> Duration {
        let inner = self.core.inner.lock().unwrap();
        self.core.remaining_locked(&inner)
    }

    pub fn queue_size(&self) -> usize {
        self.core.inner.lock().unwrap().queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.core.inner.lock().unwrap().queue.is_empty()
    }

    /// Every track id the session has seen: played, current, queued.
    pub fn all_track_ids(&self) -> Vec<String> {
        let inner = self.core.inner.lock().unwrap();
        let mut ids = Vec::with_capacity(inner.played.len() + inner.queue.len() + 1);
        ids.extend(inner.played.iter().map(|qt| qt.track.id.clone()));
        if let Some(current) = &inner.current {
            ids.push(current.track.id.clone());
        }
        ids.extend(inner.queue.iter().map(|qt| qt.track.id.clone()));
        ids
    }

    /// Whether a track id is currently playing or queued.
    pub fn is_in_queue(&self, track_id: &str) -> bool {
        let inner = self.core.inner.lock().unwrap();
        if let Some(current) = &inner.current {
            if current.track.id == track_id {
                return true;
            }
        }
        inner.queue.iter().any(|qt| qt.track.id == track_id)
    }

    pub fn queued_tracks(&self) -> Vec<QueuedTrack> {
        self.core.inner.lock().unwrap().queue.iter().cloned().collect()
    }

    pub fn played_tracks(&self) -> Vec<QueuedTrack> {
        self.core.inner.lock().unwrap().played.clone()
    }

    /// Played + current + queued, in playback order. This is the view the
    /// duplicate filter checks against.
    pub fn all_tracks(&self) -> Vec<QueuedTrack> {
        let inner = self.core.inner.lock().unwrap();
        let mut tracks = Vec::with_capacity(inner.played.len() + inner.queue.len() + 1);
        tracks.extend(inner.played.iter().cloned());
        if let Some(current) = &inner.current {
            tracks.push(current.clone());
        }
        tracks.extend(inner.queue.iter().cloned());
        tracks
    }

    /// Total duration of all queued tracks (excludes the current one).
    pub fn total_queued_duration(&self) -> Duration {
        let inner = self.core.inner.lock().unwrap();
        inner.queue.iter().map(|qt| qt.track.duration).sum()
    }

    /// Shut the controller down, cancelling all timers.
    pub fn close(&self) {
        self.core.shutdown.cancel();
        let _ = self.stop();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

impl Core {
    /// Strong handle to self for timer callbacks. Infallible while any
    /// caller holds the controller.
    fn arc(&self) -> Arc<Core> {
        self.this.upgrade().expect("controller core still referenced")
    }

    /// Push an event without blocking; a full channel drops the event.
    fn send_event(&self, event: PlaybackEvent) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let _ = self.event_tx.try_send(event);
    }

    /// Dequeue and start the next track. Must be called with the lock
    /// held (via the `inner` guard).
    fn play_next_locked(&self, inner: &mut Inner) -> Result<()> {
        let Some(next) = inner.queue.pop_front() else {
            inner.state = PlaybackState::Idle;
            self.send_event(PlaybackEvent::QueueEmpty);
            return Err(Error::QueueEmpty);
        };

        if let Some(previous) = inner.current.take() {
            inner.played.push(previous);
        }

        let track_id = next.track.id.clone();
        let track_duration = next.track.duration;
        inner.current = Some(next);
        inner.paused_at = None;
        inner.paused_elapsed = WallDelta::zero();
        inner.state = PlaybackState::Playing;

        let gap = self.config.gap_correction;
        let delay = self.config.notification_delay;

        // The scheduled start is offset by the gap; the remote player has
        // not actually begun until the gap passes.
        let start = Utc::now() + WallDelta::from_std(gap).unwrap_or_else(|_| WallDelta::zero());
        inner.start_time = start;

        // The track timer includes the gap so the end instant lines up
        // with what the remote player experiences.
        self.start_track_timer(inner, track_duration + gap);
        self.check_depletion_locked(inner);

        if delay > Duration::ZERO {
            inner.notification_time =
                Some(start + WallDelta::from_std(delay).unwrap_or_else(|_| WallDelta::zero()));
            debug!(
                track_id = %track_id,
                delay_ms = delay.as_millis() as u64,
                gap_ms = gap.as_millis() as u64,
                "scheduling delayed track-start notification"
            );

            Inner::cancel_timer(&mut inner.notification_timer);
            let expected_id = track_id;
            let core = self.arc();
            inner.notification_timer = Some(self.spawn_wall_clock_timer(gap + delay, move || {
                let mut inner = core.inner.lock().unwrap();
                inner.notification_timer = None;

                // The track may have been skipped or replaced during the delay
                match inner.current.clone() {
                    Some(track) if track.track.id == expected_id => {
                        core.send_event(PlaybackEvent::TrackStarted { track });
                    }
                    _ => {}
                }
            }));
        } else {
            inner.notification_time = None;
            if let Some(track) = inner.current.clone() {
                self.send_event(PlaybackEvent::TrackStarted { track });
            }
        }

        Ok(())
    }

    fn resume_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.current.is_none() {
            return Err(Error::NoTrack);
        }
        if inner.state != PlaybackState::Paused {
            return Err(Error::NotPaused);
        }

        let now = Utc::now();
        if let Some(paused_at) = inner.paused_at.take() {
            inner.paused_elapsed = inner.paused_elapsed + (now - paused_at);
        }
        inner.state = PlaybackState::Playing;

        let remaining = self.remaining_locked(inner);
        if remaining.is_zero() {
            // The track would have ended during the pause
            self.on_track_end_locked(inner);
            return Ok(());
        }

        // Still owing the start notification: reschedule it
        if let Some(notification_time) = inner.notification_time {
            if now < notification_time {
                let delay_remaining = (notification_time - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let core = self.arc();
                Inner::cancel_timer(&mut inner.notification_timer);
                inner.notification_timer =
                    Some(self.spawn_wall_clock_timer(delay_remaining, move || {
                        let mut inner = core.inner.lock().unwrap();
                        inner.notification_timer = None;
                        let Some(track) = inner.current.clone() else {
                            return;
                        };
                        core.send_event(PlaybackEvent::TrackStarted { track });
                    }));
            }
        }

        self.start_track_timer(inner, remaining);
        self.check_depletion_locked(inner);

        let track = inner.current.clone();
        self.send_event(PlaybackEvent::StateChanged {
            track,
            state: inner.state,
        });
        Ok(())
    }

    fn on_track_end_locked(&self, inner: &mut Inner) {
        let Some(ended) = inner.current.take() else {
            return;
        };

        Inner::cancel_timer(&mut inner.track_timer);

        let elapsed = Utc::now() - inner.start_time;
        debug!(
            track = %ended.track.name,
            expected_ms = ended.track.duration.as_millis() as u64,
            actual_ms = elapsed.num_milliseconds(),
            "track ended"
        );

        inner.played.push(ended.clone());
        inner.paused_at = None;
        inner.paused_elapsed = WallDelta::zero();

        self.send_event(PlaybackEvent::TrackEnded { track: ended });

        // Natural advance to the next queued track
        let _ = self.play_next_locked(inner);
    }

    /// Derived remaining duration of the current track.
    fn remaining_locked(&self, inner: &Inner) -> Duration {
        let Some(current) = &inner.current else {
            return Duration::ZERO;
        };

        let now = Utc::now();
        // Inside the pre-start gap nothing has elapsed yet
        if now < inner.start_time {
            return current.track.duration;
        }

        let mut elapsed = (now - inner.start_time) - inner.paused_elapsed;
        if inner.state == PlaybackState::Paused {
            if let Some(paused_at) = inner.paused_at {
                elapsed = elapsed - (now - paused_at);
            }
        }

        let duration =
            WallDelta::from_std(current.track.duration).unwrap_or_else(|_| WallDelta::zero());
        (duration - elapsed).to_std().unwrap_or(Duration::ZERO)
    }

    /// Depletion detection: fire `QueueDepleting` at most once per dip
    /// below the threshold, and keep a timer armed to re-check when the
    /// remaining playtime crosses it.
    fn check_depletion_locked(&self, inner: &mut Inner) {
        if inner.depletion_notified {
            return;
        }

        Inner::cancel_timer(&mut inner.depletion_timer);

        let mut total_remaining = Duration::ZERO;
        if inner.current.is_some() {
            total_remaining += self.remaining_locked(inner);
        }
        total_remaining += inner
            .queue
            .iter()
            .map(|qt| qt.track.duration)
            .sum::<Duration>();

        let threshold = self.config.depletion_threshold;

        if total_remaining < threshold && total_remaining > Duration::ZERO {
            inner.depletion_notified = true;
            self.send_event(PlaybackEvent::QueueDepleting);
            return;
        }

        if total_remaining > threshold && inner.state == PlaybackState::Playing {
            let delay = total_remaining - threshold;
            let core = self.arc();
            inner.depletion_timer = Some(self.spawn_wall_clock_timer(delay, move || {
                let mut inner = core.inner.lock().unwrap();
                inner.depletion_timer = None;
                core.check_depletion_locked(&mut inner);
            }));
        }
    }

    fn start_track_timer(&self, inner: &mut Inner, duration: Duration) {
        Inner::cancel_timer(&mut inner.track_timer);
        let core = self.arc();
        inner.track_timer = Some(self.spawn_wall_clock_timer(duration, move || {
            let mut inner = core.inner.lock().unwrap();
            core.on_track_end_locked(&mut inner);
        }));
    }

    /// Spawn a timer that polls the wall clock every 100 ms and invokes
    /// the callback once the deadline passes. Returns a cancel token;
    /// cancellation is idempotent.
    fn spawn_wall_clock_timer(
        &self,
        duration: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let deadline =
                Utc::now() + WallDelta::from_std(duration).unwrap_or_else(|_| WallDelta::zero());
            let mut tick = tokio::time::interval(TIMER_POLL_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        if Utc::now() >= deadline {
                            break;
                        }
                    }
                }
            }
            callback();
        });

        token
    }
}
