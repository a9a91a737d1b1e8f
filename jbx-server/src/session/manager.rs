//! Session manager
//!
//! Glues the state machine, listener registry, playback controller,
//! filter chain, BGM chain, and notification hub together. Hosts the
//! two long-running tasks: the playback-event consumer (single-threaded,
//! so broadcasts reflect event order) and the 1 Hz deadline checker that
//! fires the ending transition.

use crate::bgm::{Candidate, ProviderChain};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{
    AcceptanceGateFilter, Chain, DuplicateTrackFilter, DurationLimitFilter, Filter, KickedFilter,
    MarketFilter, RejectCode, TrackRequest, UserPendingFilter,
};
use crate::notify::Hub;
use crate::playback::{Controller, PlaybackConfig, PlaybackEvent, PlaybackState};
use crate::session::registry::ListenerRegistry;
use crate::session::state::{SessionPhase, StateStore};
use chrono::Utc;
use jbx_common::listener::ListenerSession;
use jbx_common::notification::{
    Notification, NotificationType, SessionInfo, SessionState, TrackInfo, TrackState,
};
use jbx_common::track::{QueuedTrack, Requester, RequesterClass, Track};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BGM_REFILL_RETRIES: usize = 3;
const BGM_SEED_COUNT: usize = 3;

/// Result of a track request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub accepted: bool,
    pub code: Option<RejectCode>,
}

impl RequestOutcome {
    fn accepted() -> Self {
        Self {
            accepted: true,
            code: None,
        }
    }

    fn rejected(code: RejectCode) -> Self {
        Self {
            accepted: false,
            code: Some(code),
        }
    }
}

/// Full session status snapshot
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub playback_state: PlaybackState,
    pub current_track: Option<QueuedTrack>,
    pub remaining: Duration,
    pub queue_size: usize,
    pub listener_count: usize,
    pub session_info: SessionInfo,
    pub track_info: Option<TrackInfo>,
}

/// The session manager
pub struct SessionManager {
    config: Arc<Config>,
    state: Arc<StateStore>,
    registry: Arc<ListenerRegistry>,
    playback: Arc<Controller>,
    filter_chain: Chain,
    hub: Arc<Hub>,
    catalog: Arc<dyn Catalog>,
    bgm: ProviderChain,

    /// Attributed as the requester of system-generated tracks
    system_user: ListenerSession,

    /// Last N primary artists enqueued, newest first; diversifies BGM
    recent_artists: Mutex<Vec<String>>,
    max_recent_artists: usize,

    ending_playlist_url: String,
    ending_display_name: String,

    /// Root cancellation for all session tasks
    cancel: CancellationToken,
    /// Fires once the session has fully terminated
    done: CancellationToken,

    this: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, catalog: Arc<dyn Catalog>) -> Result<Arc<Self>> {
        let bgm = ProviderChain::from_config(&config, Arc::clone(&catalog))?;

        let session_id = Uuid::new_v4().to_string();
        let state = Arc::new(StateStore::new(session_id));
        let registry = Arc::new(ListenerRegistry::new());
        let playback = Arc::new(Controller::new(PlaybackConfig {
            depletion_threshold: Duration::from_secs(config.bgm.depletion_threshold_sec),
            notification_delay: Duration::from_millis(config.playback.notification_delay_ms),
            gap_correction: Duration::from_millis(config.playback.gap_correction_ms),
        }));

        let filter_chain = Self::build_filters(&config, &state, &playback)?;

        let system_user = ListenerSession::new(
            Uuid::new_v4().to_string(),
            "System".to_string(),
            String::new(),
            false,
        );

        Ok(Arc::new_cyclic(|this| Self {
            state,
            registry,
            playback,
            filter_chain,
            hub: Arc::new(Hub::new()),
            catalog,
            bgm,
            system_user,
            recent_artists: Mutex::new(Vec::new()),
            max_recent_artists: config.bgm.recent_artist_count,
            ending_playlist_url: config.playlists.ending.playlist_url.clone(),
            ending_display_name: config.playlists.ending.display_name.clone(),
            config,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            this: this.clone(),
        }))
    }

    fn arc(&self) -> Arc<Self> {
        self.this.upgrade().expect("session manager still referenced")
    }

    /// Assemble the filter chain in registration order. Filters that
    /// need runtime dependencies get them injected here.
    fn build_filters(
        config: &Config,
        state: &Arc<StateStore>,
        playback: &Arc<Controller>,
    ) -> Result<Chain> {
        let mut chain = Chain::new();

        let accepting_state = Arc::clone(state);
        let end_time_state = Arc::clone(state);
        let ending_state = Arc::clone(state);
        let queued_playback = Arc::clone(playback);
        let remaining_playback = Arc::clone(playback);
        chain.add(Box::new(AcceptanceGateFilter::new(
            Box::new(move || accepting_state.can_accept_requests()),
            Box::new(move || end_time_state.times().1),
            Box::new(move || ending_state.ending_duration()),
            Box::new(move || queued_playback.total_queued_duration()),
            Box::new(move || remaining_playback.remaining_duration()),
            Box::new(Utc::now),
        )));

        chain.add(Box::new(MarketFilter::new(config.catalog.market.clone())));

        if config.is_filter_enabled("kicked_listener_filter") {
            chain.add(Box::new(KickedFilter));
        }
        if config.is_filter_enabled("user_pending_filter") {
            chain.add(Box::new(UserPendingFilter));
        }
        if config.is_filter_enabled("duplicate_track_filter") {
            chain.add(Box::new(DuplicateTrackFilter::new(
                Arc::clone(playback) as Arc<dyn crate::filter::QueueSnapshot>
            )));
        }
        if config.is_filter_enabled("duration_limit_filter") {
            let mut filter = DurationLimitFilter::new();
            let settings = config.filter_settings("duration_limit_filter");
            // An enabled filter with broken settings is a startup error,
            // not a filter to silently drop
            filter.validate_config(&settings)?;
            chain.add(Box::new(filter));
        }

        Ok(chain)
    }

    /// Start the session: wait for the scheduled start, create the
    /// session playlist, load the opening playlist (or preload BGM), and
    /// open the acceptance gate.
    pub async fn start(&self) -> Result<()> {
        let start_time = self.config.parse_start_time()?;
        let end_time = self.config.parse_end_time()?;
        self.state.set_times(start_time, end_time);
        self.state
            .set_keywords(self.config.session.keywords.clone());

        if let Some(start) = start_time {
            let now = Utc::now();
            if start > now {
                let wait = (start - now).to_std().unwrap_or(Duration::ZERO);
                info!(start_time = %start, wait_secs = wait.as_secs(), "waiting for session start time");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.cancel.cancelled() => return Err(Error::SessionNotRunning),
                }
                info!(start_time = %start, "start time reached, starting session");
            }
        }

        // Create the shared session playlist on the catalog
        let created_at = Utc::now().format("%Y-%m-%d %H:%M").to_string();
        let playlist_name = if self.config.session.title.is_empty() {
            format!("Session({created_at})")
        } else {
            self.config.session.title.clone()
        };
        let playlist_id = self
            .catalog
            .create_playlist(&playlist_name, &format!("Created by jbx at {created_at}"))
            .await?;
        let playlist_url = self.catalog.playlist_url(&playlist_id);
        debug!(playlist_id = %playlist_id, playlist_url = %playlist_url, name = %playlist_name, "session playlist created");
        self.state
            .set_playlist_info(playlist_id.clone(), playlist_url, playlist_name);

        // Load the opening playlist into the queue and the session playlist
        let opening_url = &self.config.playlists.opening.playlist_url;
        if !opening_url.is_empty() {
            let tracks = self.catalog.get_playlist_tracks(opening_url).await?;
            info!(track_count = tracks.len(), "loaded opening playlist");
            let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
            self.enqueue_playlist_tracks(
                tracks,
                &self.config.playlists.opening.display_name.clone(),
                RequesterClass::Opening,
            );
            self.catalog
                .add_tracks_to_playlist(&playlist_id, &ids)
                .await?;
        }

        // The ending playlist's total playtime backs the acceptance deadline
        if !self.ending_playlist_url.is_empty() {
            let tracks = self
                .catalog
                .get_playlist_tracks(&self.ending_playlist_url)
                .await?;
            let ending_duration: Duration = tracks.iter().map(|t| t.duration).sum();
            self.state.set_ending_duration(ending_duration);
        }

        // Without an opening playlist, seed the queue with one BGM track
        // so playback has something to start on. The acceptance gate is
        // not open yet, so the preload skips that re-check.
        if opening_url.is_empty() {
            self.fill_queue(false).await;
        }

        self.state.set_phase(SessionPhase::Active);
        self.state.start_accepting();
        info!(session_id = %self.state.session_id(), phase = %SessionPhase::Active, "phase changed");

        if start_time.is_none() {
            self.state.set_times(Some(Utc::now()), end_time);
        }

        self.broadcast_state_change().await;

        // Long-running tasks: event consumer and deadline checker
        if let Some(events) = self.playback.take_events() {
            self.spawn_event_loop(events);
        }
        if end_time.is_some() {
            self.spawn_deadline_checker();
        }

        if let Err(e) = self.playback.play() {
            debug!(error = %e, "initial play");
        }
        Ok(())
    }

    /// Graceful stop: an active session transitions to ending and plays
    /// the ending playlist out; a waiting session terminates directly.
    pub async fn stop(&self) -> Result<()> {
        match self.state.phase() {
            SessionPhase::Terminated => Ok(()),
            SessionPhase::Ending => {
                info!(session_id = %self.state.session_id(), "session already ending");
                Ok(())
            }
            SessionPhase::Waiting => {
                self.state.set_phase(SessionPhase::Terminated);
                info!(
                    session_id = %self.state.session_id(),
                    reason = "stopped_before_starting",
                    "phase changed to TERMINATED"
                );
                self.cancel.cancel();
                self.done.cancel();
                Ok(())
            }
            SessionPhase::Active => {
                info!(session_id = %self.state.session_id(), "stopping session gracefully");
                self.transition_to_ending("admin_stop").await;
                Ok(())
            }
        }
    }

    /// Immediate termination without the ending playlist.
    pub async fn stop_immediate(&self) -> Result<()> {
        match self.state.phase() {
            SessionPhase::Terminated | SessionPhase::Ending => return Ok(()),
            SessionPhase::Waiting => {
                self.state.set_phase(SessionPhase::Terminated);
                info!(session_id = %self.state.session_id(), "phase changed to TERMINATED");
                self.cancel.cancel();
                self.done.cancel();
                return Ok(());
            }
            SessionPhase::Active => {}
        }

        self.terminate("immediate_stop").await;
        Ok(())
    }

    /// Move active → ending: close the gate, swap the queue for the
    /// ending playlist, and mirror the swap on the session playlist.
    async fn transition_to_ending(&self, reason: &str) {
        if !self.state.begin_ending() {
            return;
        }
        info!(
            session_id = %self.state.session_id(),
            reason,
            "phase changed to ENDING"
        );

        if !self.ending_playlist_url.is_empty() {
            self.swap_queue_for_ending_playlist().await;
        }

        self.broadcast_state_change().await;
    }

    /// Replace the waiting queue with the ending playlist, mirroring the
    /// swap onto the session playlist. The current track keeps playing.
    async fn swap_queue_for_ending_playlist(&self) {
        let tracks = match self
            .catalog
            .get_playlist_tracks(&self.ending_playlist_url)
            .await
        {
            Ok(tracks) => tracks,
            Err(e) => {
                error!(error = %e, "failed to load ending playlist");
                return;
            }
        };
        if tracks.is_empty() {
            warn!("ending playlist is empty");
            return;
        }

        let removed = self.playback.clear_queue();
        info!(count = removed.len(), "removed unplayed tracks");

        let playlist_id = self.state.playlist_id();
        if !removed.is_empty() {
            let removed_ids: Vec<String> =
                removed.iter().map(|qt| qt.track.id.clone()).collect();
            if let Err(e) = self
                .catalog
                .remove_tracks_from_playlist(&playlist_id, &removed_ids)
                .await
            {
                error!(error = %e, "failed to remove tracks from session playlist");
            }
        }

        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        self.enqueue_playlist_tracks(
            tracks,
            &self.ending_display_name.clone(),
            RequesterClass::Ending,
        );
        if let Err(e) = self.catalog.add_tracks_to_playlist(&playlist_id, &ids).await {
            error!(error = %e, "failed to add ending tracks to session playlist");
        }
    }

    /// Final termination: stop playback, broadcast the terminal state
    /// change bounded by one second, and fire the done signal.
    async fn terminate(&self, reason: &str) {
        if self.state.phase() == SessionPhase::Terminated {
            return;
        }
        self.state.set_phase(SessionPhase::Terminated);
        self.state.stop_accepting();

        let (start_time, _) = self.state.times();
        self.state.set_times(start_time, Some(Utc::now()));

        info!(session_id = %self.state.session_id(), reason, "phase changed to TERMINATED");

        let _ = self.playback.stop();

        let notification = Notification {
            sequence_no: 0,
            notification_type: NotificationType::ChangeState,
            session_info: self.build_session_info(),
            track_info: None,
        };
        if tokio::time::timeout(Duration::from_secs(1), self.hub.broadcast(notification))
            .await
            .is_err()
        {
            warn!("session ended notification timed out");
        }

        // Brief grace so in-flight stream writes drain before cancel
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.cancel.cancel();
        self.done.cancel();
    }

    /// Signal that fires when the session has terminated.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Pause playback. Requires an active session.
    pub fn pause(&self) -> Result<()> {
        if self.state.phase() != SessionPhase::Active {
            return Err(Error::SessionNotRunning);
        }
        self.playback.pause()
    }

    /// Resume paused playback.
    pub fn resume(&self) -> Result<()> {
        if self.playback.state() != PlaybackState::Paused {
            return Err(Error::SessionNotPaused);
        }
        self.playback.resume()
    }

    /// Skip the current track. Requires an active session.
    pub fn skip(&self) -> Result<()> {
        if self.state.phase() != SessionPhase::Active {
            return Err(Error::SessionNotRunning);
        }
        match self.playback.skip() {
            // Skipping the last track leaves the queue empty; the event
            // loop reacts, the skip itself succeeded
            Err(Error::QueueEmpty) => Ok(()),
            other => other,
        }
    }

    /// Add a listener. Display names listed in the admin config join as
    /// VIP.
    pub fn join(&self, display_name: &str, external_user_id: &str) -> Result<String> {
        if self.state.phase() == SessionPhase::Terminated {
            return Err(Error::SessionNotRunning);
        }
        let vip = self.config.is_admin_display_name(display_name);
        let id = self.registry.join(display_name, external_user_id, vip);
        info!(listener_id = %id, display_name, vip, "listener joined");
        Ok(id)
    }

    pub fn kick_listener(&self, listener_id: &str) -> Result<()> {
        self.registry.kick(listener_id)
    }

    pub fn list_listeners(&self) -> Vec<ListenerSession> {
        self.registry.all()
    }

    pub fn notification_hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Handle a listener's track request: validate, fetch, filter, and
    /// on acceptance enqueue plus mirror to the session playlist.
    pub async fn request_track(&self, listener_id: &str, track_id: &str) -> Result<RequestOutcome> {
        let listener = match self.registry.get(listener_id) {
            Ok(listener) => listener,
            Err(_) => {
                warn!(listener_id, code = "invalid_listener", "track request rejected");
                return Ok(RequestOutcome::rejected(RejectCode::InvalidListener));
            }
        };

        let track = match self
            .catalog
            .get_track(track_id, Some(&self.config.catalog.market))
            .await
        {
            Ok(track) => track,
            Err(e) => {
                warn!(listener_id, track_id, error = %e, code = "track_not_found", "track request rejected");
                return Ok(RequestOutcome::rejected(RejectCode::TrackNotFound));
            }
        };

        let request = TrackRequest {
            listener_id: listener_id.to_string(),
            track_id: track_id.to_string(),
        };
        let result =
            self.filter_chain
                .execute(&request, &track, &listener, RequesterClass::User);
        info!(
            listener = %listener.display_name,
            track = %track.name,
            accepted = result.accepted(),
            code = result.code().map(|c| c.as_str()).unwrap_or(""),
            "track request"
        );
        if let Some(code) = result.code() {
            return Ok(RequestOutcome::rejected(code));
        }

        let artists = track.artists.clone();
        let catalog_track_id = track.id.clone();
        let qt = QueuedTrack {
            track,
            requester: Requester {
                id: listener.id.clone(),
                display_name: listener.display_name.clone(),
                external_user_id: listener.external_user_id.clone(),
                class: RequesterClass::User,
            },
            added_at: Utc::now(),
        };
        self.playback.enqueue(qt);
        self.add_recent_artists(&artists);

        if let Err(e) = self.registry.increment_pending(listener_id) {
            error!(error = %e, "failed to increment pending count");
        }

        let playlist_id = self.state.playlist_id();
        if let Err(e) = self
            .catalog
            .add_tracks_to_playlist(&playlist_id, &[catalog_track_id])
            .await
        {
            error!(error = %e, "failed to add track to session playlist");
        }

        if self.playback.state() == PlaybackState::Idle {
            if let Err(e) = self.playback.play() {
                debug!(error = %e, "play after enqueue");
            }
        }

        Ok(RequestOutcome::accepted())
    }

    /// Current session status snapshot.
    pub fn status(&self) -> SessionStatus {
        let current = self.playback.current_track();
        let playback_state = self.playback.state();
        let track_info = current
            .as_ref()
            .map(|qt| self.build_track_info(qt, playback_state));

        SessionStatus {
            phase: self.state.phase(),
            playback_state,
            remaining: self.playback.remaining_duration(),
            queue_size: self.playback.queue_size(),
            listener_count: self.registry.count(),
            session_info: self.build_session_info(),
            track_info,
            current_track: current,
        }
    }

    /// User-facing message for a request outcome.
    pub fn message_for(&self, outcome: &RequestOutcome) -> String {
        let code = match outcome.code {
            None => "success",
            Some(code) => code.as_str(),
        };
        self.config.message_for(code).to_string()
    }

    // ---- playback event handling ----

    /// Run the event consumer under a supervisor that restarts it if it
    /// panics, preventing a zombie session.
    fn spawn_event_loop(&self, events: mpsc::Receiver<PlaybackEvent>) {
        let manager = self.arc();
        let events = Arc::new(tokio::sync::Mutex::new(events));
        tokio::spawn(async move {
            loop {
                let consumer = Arc::clone(&manager);
                let events = Arc::clone(&events);
                let handle = tokio::spawn(consumer.consume_events(events));
                match handle.await {
                    Ok(()) => return,
                    Err(e) if e.is_panic() => {
                        error!("playback event loop panicked, restarting");
                    }
                    Err(_) => return,
                }
            }
        });
    }

    async fn consume_events(
        self: Arc<Self>,
        events: Arc<tokio::sync::Mutex<mpsc::Receiver<PlaybackEvent>>>,
    ) {
        let mut events = events.lock().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_playback_event(event).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_playback_event(&self, event: PlaybackEvent) {
        info!(event_type = event.type_name(), "playback event");
        match event {
            PlaybackEvent::TrackStarted { track } => self.on_track_started(track).await,
            PlaybackEvent::TrackEnded { .. } => {
                // The controller already advanced to the next track
            }
            PlaybackEvent::TrackSkipped { track } => self.on_track_skipped(track).await,
            PlaybackEvent::StateChanged { track, state } => {
                self.on_state_changed(track, state).await
            }
            PlaybackEvent::QueueDepleting => self.on_queue_depleting().await,
            PlaybackEvent::QueueEmpty => self.on_queue_empty().await,
        }
    }

    async fn on_track_started(&self, track: QueuedTrack) {
        // The requester's slot frees up once their track starts
        self.registry.decrement_pending(&track.requester.id);

        let mut track_info = self.build_track_info(&track, self.playback.state());
        track_info.state = TrackState::Started;

        info!(track_id = %track.track.id, name = %track.track.name, "broadcast TRACK_STARTED");
        self.hub
            .broadcast(Notification {
                sequence_no: 0,
                notification_type: NotificationType::ChangeTrack,
                session_info: self.build_session_info(),
                track_info: Some(track_info),
            })
            .await;
    }

    async fn on_track_skipped(&self, track: QueuedTrack) {
        let mut track_info = self.build_track_info(&track, self.playback.state());
        track_info.state = TrackState::Skipped;

        info!(track_id = %track.track.id, "broadcast TRACK_SKIPPED");
        self.hub
            .broadcast(Notification {
                sequence_no: 0,
                notification_type: NotificationType::ChangeTrack,
                session_info: self.build_session_info(),
                track_info: Some(track_info),
            })
            .await;
    }

    async fn on_state_changed(&self, track: Option<QueuedTrack>, state: PlaybackState) {
        match state {
            PlaybackState::Paused => info!("broadcast SESSION_PAUSED"),
            PlaybackState::Playing => info!("broadcast SESSION_RESUMED"),
            PlaybackState::Idle => return,
        }

        let track_info = track.map(|qt| self.build_track_info(&qt, state));
        self.hub
            .broadcast(Notification {
                sequence_no: 0,
                notification_type: NotificationType::ChangeState,
                session_info: self.build_session_info(),
                track_info,
            })
            .await;
    }

    async fn on_queue_depleting(&self) {
        if !self.state.can_accept_requests() {
            return;
        }
        self.fill_queue_with_bgm().await;
    }

    async fn on_queue_empty(&self) {
        match self.state.phase() {
            SessionPhase::Ending => {
                info!("ending playlist finished, terminating session");
                self.terminate("ending_playlist_finished").await;
            }
            SessionPhase::Active if self.state.is_accepting() => {
                self.fill_queue_with_bgm().await;
            }
            _ => {}
        }
    }

    // ---- BGM refill ----

    /// Refill entry point for the depletion and queue-empty events.
    async fn fill_queue_with_bgm(&self) {
        self.fill_queue(true).await;
    }

    /// Pull candidates from the provider chain, diversify against the
    /// recent-artists window, re-run the filter chain, and enqueue the
    /// first acceptable candidate. Retries with a growing exclusion set
    /// when a whole batch is rejected. `require_accepting` re-checks the
    /// acceptance gate after provider I/O; the startup preload runs
    /// before the gate opens and skips it.
    async fn fill_queue(&self, require_accepting: bool) {
        let mut exclude: HashSet<String> =
            self.playback.all_track_ids().into_iter().collect();
        let seeds = self.recent_tracks(BGM_SEED_COUNT);

        for retry in 0..BGM_REFILL_RETRIES {
            let candidates = match self
                .bgm
                .get_candidates(self.config.bgm.candidate_count, &seeds, &exclude)
                .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(error = %e, "failed to get BGM candidates");
                    return;
                }
            };
            if candidates.is_empty() {
                warn!("no BGM candidates");
                return;
            }

            // The session may have stopped accepting while we were
            // waiting on provider I/O
            if require_accepting && !self.state.can_accept_requests() {
                debug!("skipping BGM enqueue due to state change after candidate fetch");
                return;
            }

            let filtered = self.filter_by_recent_artists(candidates.clone());

            for candidate in filtered {
                // A user request may have landed during selection
                if !self.playback.is_queue_empty() {
                    info!("skipping BGM enqueue: queue is no longer empty");
                    return;
                }
                if self.playback.is_in_queue(&candidate.track.id) {
                    exclude.insert(candidate.track.id.clone());
                    continue;
                }

                let request = TrackRequest {
                    listener_id: self.system_user.id.clone(),
                    track_id: candidate.track.id.clone(),
                };
                let result = self.filter_chain.execute(
                    &request,
                    &candidate.track,
                    &self.system_user,
                    RequesterClass::Bgm,
                );
                if let Some(code) = result.code() {
                    debug!(
                        track_id = %candidate.track.id,
                        name = %candidate.track.name,
                        reason = code.as_str(),
                        "BGM candidate rejected by filter"
                    );
                    exclude.insert(candidate.track.id.clone());
                    continue;
                }

                self.enqueue_bgm_candidate(candidate).await;
                return;
            }

            // Everything was filtered out; widen the exclusion and retry
            for candidate in &candidates {
                exclude.insert(candidate.track.id.clone());
            }
            debug!(
                retry = retry + 1,
                max_retries = BGM_REFILL_RETRIES,
                excluded = exclude.len(),
                "all BGM candidates filtered out, retrying"
            );
        }

        warn!("no suitable BGM candidates after filtering");
    }

    async fn enqueue_bgm_candidate(&self, candidate: Candidate) {
        let track_id = candidate.track.id.clone();
        let track_name = candidate.track.name.clone();
        let artists = candidate.track.artists.clone();

        self.playback.enqueue(QueuedTrack {
            track: candidate.track,
            requester: Requester {
                id: self.system_user.id.clone(),
                display_name: candidate.display_name,
                external_user_id: String::new(),
                class: RequesterClass::Bgm,
            },
            added_at: Utc::now(),
        });

        let playlist_id = self.state.playlist_id();
        if let Err(e) = self
            .catalog
            .add_tracks_to_playlist(&playlist_id, &[track_id.clone()])
            .await
        {
            error!(error = %e, "failed to add BGM track to session playlist");
        }

        info!(track_id = %track_id, name = %track_name, "added BGM track");
        self.add_recent_artists(&artists);

        if self.playback.state() == PlaybackState::Idle {
            if let Err(e) = self.playback.play() {
                debug!(error = %e, "play after BGM enqueue");
            }
        }
    }

    /// Drop candidates whose artists appeared recently. When that would
    /// empty the batch, the window resets and the unfiltered batch is
    /// returned; a same-artist replay beats starving the queue.
    fn filter_by_recent_artists(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut recent = self.recent_artists.lock().unwrap();
        if self.max_recent_artists == 0 {
            return candidates;
        }
        debug!(recent_artists = ?*recent, "filtering BGM candidates by recent artists");

        let filtered: Vec<Candidate> = candidates
            .iter()
            .filter(|c| {
                !c.track
                    .artists
                    .iter()
                    .any(|artist| recent.iter().any(|r| r == artist))
            })
            .cloned()
            .collect();

        if filtered.is_empty() && !recent.is_empty() {
            recent.clear();
            return candidates;
        }
        filtered
    }

    fn add_recent_artists(&self, artists: &[String]) {
        let mut recent = self.recent_artists.lock().unwrap();
        for artist in artists {
            recent.insert(0, artist.clone());
            if recent.len() > self.max_recent_artists {
                recent.truncate(self.max_recent_artists);
            }
        }
    }

    /// Seed tracks for recommendations: the current track, when any.
    fn recent_tracks(&self, count: usize) -> Vec<Track> {
        let mut recent = Vec::new();
        if let Some(qt) = self.playback.current_track() {
            recent.push(qt.track);
        }
        recent.truncate(count);
        recent
    }

    // ---- deadline checker ----

    /// Tick at 1 Hz while active with a scheduled end, firing the ending
    /// transition exactly once at `scheduled_end - ending_duration`.
    fn spawn_deadline_checker(&self) {
        let manager = self.arc();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let (_, end_time) = manager.state.times();
                let Some(end_time) = end_time else { continue };
                if manager.state.phase() != SessionPhase::Active {
                    continue;
                }

                let ending = chrono::Duration::from_std(manager.state.ending_duration())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let deadline = end_time - ending;
                if Utc::now() >= deadline {
                    info!(deadline = %deadline, "acceptance deadline reached");
                    manager.transition_to_ending("acceptance_deadline_reached").await;
                    return;
                }
            }
        });
    }

    // ---- snapshots ----

    /// Wire session state from phase and playback state.
    fn wire_session_state(&self) -> SessionState {
        match self.state.phase() {
            SessionPhase::Waiting => SessionState::Waiting,
            SessionPhase::Active => match self.playback.state() {
                PlaybackState::Paused => SessionState::Paused,
                PlaybackState::Idle => SessionState::WaitingForTracks,
                PlaybackState::Playing => SessionState::Running,
            },
            SessionPhase::Ending => SessionState::Ending,
            SessionPhase::Terminated => SessionState::Terminated,
        }
    }

    fn build_session_info(&self) -> SessionInfo {
        self.state.build_session_info(self.wire_session_state())
    }

    fn build_track_info(&self, qt: &QueuedTrack, playback_state: PlaybackState) -> TrackInfo {
        let remaining = self.playback.remaining_duration();
        let playlist_id = self.state.playlist_id();
        let url = self
            .catalog
            .track_url_with_context(&qt.track.id, &playlist_id);

        TrackInfo {
            track_id: qt.track.id.clone(),
            name: qt.track.name.clone(),
            artists: qt.track.artists.clone(),
            url,
            album_art_url: qt.track.album_art_url.clone(),
            requester_name: qt.requester.display_name.clone(),
            requester_external_user_id: qt.requester.external_user_id.clone(),
            requester_type: qt.requester.class.to_string(),
            playlist_url: self.state.playlist_url(),
            remaining_seconds: remaining.as_secs() as i32,
            state: match playback_state {
                PlaybackState::Paused => TrackState::Paused,
                _ => TrackState::Playing,
            },
        }
    }

    async fn broadcast_state_change(&self) {
        info!(session_id = %self.state.session_id(), "broadcast CHANGE_STATE");
        self.hub
            .broadcast(Notification {
                sequence_no: 0,
                notification_type: NotificationType::ChangeState,
                session_info: self.build_session_info(),
                track_info: None,
            })
            .await;
    }

    /// Append playlist-sourced tracks to the queue under a system
    /// requester identity.
    fn enqueue_playlist_tracks(
        &self,
        tracks: Vec<Track>,
        requester_name: &str,
        class: RequesterClass,
    ) {
        for track in tracks {
            let artists = track.artists.clone();
            self.playback.enqueue(QueuedTrack {
                track,
                requester: Requester {
                    id: self.system_user.id.clone(),
                    display_name: requester_name.to_string(),
                    external_user_id: String::new(),
                    class,
                },
                added_at: Utc::now(),
            });
            self.add_recent_artists(&artists);
        }
    }

    /// Tear the session down without the termination protocol. Used on
    /// process shutdown after the session already terminated.
    pub fn close(&self) {
        self.cancel.cancel();
        self.playback.close();
        self.hub.close();
    }
}
