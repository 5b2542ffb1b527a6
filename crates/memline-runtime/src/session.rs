//! [`TimelineSession`] – one viewer's complete timeline state.
//!
//! The session is synchronous and single-owner. It composes the engine
//! pieces in the order data flows through them:
//!
//! ```text
//! bulk records ─► normalize ─► aggregate ─┐
//! live frames ─► LiveBuffer ──────────────┴► view ─► resolve ─► visible
//!                                                     │
//!                                 PlaybackClock ◄─────┘
//!                                       │
//!                                       ▼
//!                                 SelectionCell ─► watch readers
//! ```
//!
//! Every mutation that can change the visible sequence recomputes it from
//! scratch; nothing is patched in place. The async wrapper lives in
//! [`driver`](crate::driver).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use memline_engine::aggregate::{aggregate_results, sort_chronologically, with_live};
use memline_engine::{
    ApplyOutcome, Criteria, DEFAULT_RETENTION, LiveBuffer, MemberSet, PlaybackClock,
    PlaybackState, Selection, SelectionCell, SelectionOutcome, SelectionUpdate, SourceFilter,
    TickOutcome, normalize_all, now_seconds, resolve,
};
use memline_feed::{StatusBoard, StreamState};
use memline_types::{EntryKey, Feed, MemlineError, RawRecord, SourceKind, TimelineEntry};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-session tunables. The session never reads files or the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Wall-clock period of one playback tick.
    pub tick_period: Duration,
    pub speed_multiplier: f64,
    /// Capacity of the live event buffer.
    pub live_retention: usize,
    /// Propose every newly inserted live entry as the selection.
    pub auto_select_live: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            speed_multiplier: 1.0,
            live_retention: DEFAULT_RETENTION,
            auto_select_live: true,
        }
    }
}

/// Which sequence the resolver and playback clock operate on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// STM + LTM + bulk events + live buffer.
    #[default]
    Timeline,
    /// STM + LTM only.
    Memory,
    /// The live buffer only.
    Events,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Timeline => "timeline",
            View::Memory => "memory",
            View::Events => "events",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeline" | "all" => Ok(View::Timeline),
            "memory" | "latent" => Ok(View::Memory),
            "events" | "live" => Ok(View::Events),
            other => Err(format!("unknown view '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only picture of a session, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub view: View,
    pub visible: Vec<TimelineEntry>,
    /// Length of the active view before filtering.
    pub view_len: usize,
    pub playback: PlaybackState,
    pub filter: String,
    pub search: String,
    pub selector: Option<String>,
    pub live_len: usize,
    pub status: StatusBoard,
    /// Feeds whose last fetch failed, with the reason.
    pub source_errors: Vec<(Feed, String)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TimelineSession
// ─────────────────────────────────────────────────────────────────────────────

type SourceSlot = Result<Vec<TimelineEntry>, MemlineError>;

pub struct TimelineSession {
    config: SessionConfig,
    stm: SourceSlot,
    ltm: SourceSlot,
    events: SourceSlot,
    live: LiveBuffer,
    status: StatusBoard,
    criteria: Criteria,
    view: View,
    clock: PlaybackClock,
    selection: SelectionCell,
    /// Active view, unfiltered.
    sequence: Vec<TimelineEntry>,
    /// Active view after the resolver.
    visible: Vec<TimelineEntry>,
}

impl TimelineSession {
    pub fn new(config: SessionConfig) -> Self {
        let clock = PlaybackClock::new(config.tick_period).with_speed(config.speed_multiplier);
        let live = LiveBuffer::new(config.live_retention);
        Self {
            config,
            stm: Ok(Vec::new()),
            ltm: Ok(Vec::new()),
            events: Ok(Vec::new()),
            live,
            status: StatusBoard::new(),
            criteria: Criteria::default(),
            view: View::default(),
            clock,
            selection: SelectionCell::new(),
            sequence: Vec::new(),
            visible: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Ingestion ───────────────────────────────────────────────────────────

    /// Replace one bulk source with a fresh fetch result. A failed fetch
    /// empties that source only.
    pub fn ingest(&mut self, feed: Feed, fetched: Result<Vec<RawRecord>, MemlineError>) {
        self.ingest_at(feed, fetched, now_seconds());
    }

    pub fn ingest_at(
        &mut self,
        feed: Feed,
        fetched: Result<Vec<RawRecord>, MemlineError>,
        now: f64,
    ) {
        let slot = match fetched {
            Ok(records) => {
                let entries = normalize_all(&records, now);
                info!(%feed, received = records.len(), kept = entries.len(), "source loaded");
                Ok(entries)
            }
            Err(e) => {
                warn!(%feed, error = %e, "source failed; showing it as empty");
                Err(e)
            }
        };
        match feed {
            Feed::Stm => self.stm = slot,
            Feed::Ltm => self.ltm = slot,
            Feed::Events => self.events = slot,
        }
        self.refresh();
    }

    /// Apply one raw push-stream payload.
    ///
    /// Parse and normalization failures are returned for the caller to log;
    /// they never disturb the session.
    pub fn apply_frame(&mut self, text: &str) -> Result<ApplyOutcome, MemlineError> {
        self.apply_frame_at(text, now_seconds())
    }

    pub fn apply_frame_at(&mut self, text: &str, now: f64) -> Result<ApplyOutcome, MemlineError> {
        let outcome = self.live.apply_text(text, now)?;
        match &outcome {
            ApplyOutcome::Inserted { key, evicted } => {
                self.refresh();
                if let Some(dropped) = evicted
                    && self.find_anywhere(dropped).is_none()
                    && self.selection.clear_if(dropped)
                {
                    debug!(key = %dropped, "selected entry left the live buffer");
                }
                if self.config.auto_select_live
                    && let Some(entry) = self.live.get(key).cloned()
                {
                    let observed = self.selection.generation();
                    self.selection.apply(SelectionUpdate::stream(entry, observed));
                }
            }
            ApplyOutcome::Evicted(key) | ApplyOutcome::Duplicate(key) => {
                debug!(%key, ?outcome, "live delta not retained");
            }
            ApplyOutcome::ServiceStatus { service, online } => {
                if self.status.set_service(service, *online) {
                    info!(%service, online, "service status changed");
                }
            }
            ApplyOutcome::Control => {}
        }
        Ok(outcome)
    }

    pub fn set_stream_state(&mut self, state: StreamState) {
        if self.status.set_stream(state) {
            info!(%state, "push stream state changed");
        }
    }

    // ── Consumer reads ──────────────────────────────────────────────────────

    pub fn ordered_visible_entries(&self) -> &[TimelineEntry] {
        &self.visible
    }

    pub fn selected_entry(&self) -> Option<TimelineEntry> {
        self.selection.selected_entry()
    }

    pub fn selection(&self) -> Selection {
        self.selection.current()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<Selection> {
        self.selection.subscribe()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.clock.state()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn live(&self) -> &LiveBuffer {
        &self.live
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn source_error(&self, feed: Feed) -> Option<&MemlineError> {
        let slot = match feed {
            Feed::Stm => &self.stm,
            Feed::Ltm => &self.ltm,
            Feed::Events => &self.events,
        };
        slot.as_ref().err()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            view: self.view,
            visible: self.visible.clone(),
            view_len: self.sequence.len(),
            playback: self.clock.state(),
            filter: self.criteria.source.to_string(),
            search: self.criteria.search.clone(),
            selector: self.criteria.selector().map(|s| s.label()),
            live_len: self.live.len(),
            status: self.status.clone(),
            source_errors: Feed::ALL
                .into_iter()
                .filter_map(|feed| self.source_error(feed).map(|e| (feed, e.to_string())))
                .collect(),
        }
    }

    // ── Selection ───────────────────────────────────────────────────────────

    /// User pick by key. Looks in the visible sequence first, then in the
    /// whole session. Returns `None` when no entry has that key.
    pub fn select_entry(&mut self, key: &EntryKey) -> Option<SelectionOutcome> {
        if let Some(index) = self.visible.iter().position(|e| e.has_key(key)) {
            let entry = self.visible[index].clone();
            self.clock.sync_to(index, key.clone());
            return Some(self.selection.apply(SelectionUpdate::user(Some(entry))));
        }
        let entry = self.find_anywhere(key)?.clone();
        Some(self.selection.apply(SelectionUpdate::user(Some(entry))))
    }

    pub fn clear_selection(&mut self) -> SelectionOutcome {
        self.selection.apply(SelectionUpdate::user(None))
    }

    fn find_anywhere(&self, key: &EntryKey) -> Option<&TimelineEntry> {
        let bulk = [&self.stm, &self.ltm, &self.events];
        bulk.into_iter()
            .filter_map(|slot| slot.as_ref().ok())
            .flatten()
            .find(|e| e.has_key(key))
            .or_else(|| self.live.get(key))
    }

    // ── Playback ────────────────────────────────────────────────────────────

    pub fn play(&mut self) {
        self.clock.play();
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    pub fn reset(&mut self) {
        self.clock.reset();
    }

    pub fn seek(&mut self, seconds: f64) {
        self.clock.seek(seconds);
        self.propose_playback_selection();
    }

    pub fn set_speed(&mut self, speed: f64) -> bool {
        self.clock.set_speed(speed)
    }

    /// Advance playback by one tick period.
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.clock.tick(self.visible.len());
        match outcome {
            TickOutcome::Idle => {}
            TickOutcome::Advanced => self.propose_playback_selection(),
            TickOutcome::ReachedEnd => {
                self.propose_playback_selection();
                info!(cursor = self.clock.state().cursor_seconds, "playback reached the end");
            }
        }
        outcome
    }

    fn propose_playback_selection(&mut self) {
        let observed = self.selection.generation();
        if let Some(entry) = self.clock.next_selection(&self.visible) {
            let update = SelectionUpdate::playback(entry.clone(), observed);
            self.selection.apply(update);
        }
    }

    // ── Criteria and view ───────────────────────────────────────────────────

    pub fn set_filter(&mut self, source: SourceFilter) {
        self.criteria.source = source;
        self.criteria_changed();
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.criteria.search = query.into();
        self.criteria_changed();
    }

    pub fn set_cluster_selector(&mut self, members: MemberSet) {
        self.criteria.set_cluster(members);
        self.criteria_changed();
    }

    pub fn set_group_selector(&mut self, members: MemberSet) {
        self.criteria.set_group(members);
        self.criteria_changed();
    }

    pub fn clear_selector(&mut self) {
        self.criteria.clear_selector();
        self.criteria_changed();
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
        self.criteria_changed();
    }

    fn criteria_changed(&mut self) {
        self.clock.forget_index();
        self.refresh();
    }

    // ── Recompute ───────────────────────────────────────────────────────────

    fn refresh(&mut self) {
        self.sequence = match self.view {
            View::Timeline => {
                let bulk = aggregate_results(&self.stm, &self.ltm, &self.events);
                let mut merged = with_live(&bulk, self.live.entries());
                sort_chronologically(&mut merged);
                merged
            }
            View::Memory => {
                let bulk = aggregate_results(&self.stm, &self.ltm, &Ok(Vec::new()));
                let live_memories: Vec<TimelineEntry> = self
                    .live
                    .entries()
                    .iter()
                    .filter(|e| matches!(e.source_kind, SourceKind::Stm | SourceKind::Ltm))
                    .cloned()
                    .collect();
                let mut merged = with_live(&bulk, &live_memories);
                sort_chronologically(&mut merged);
                merged
            }
            View::Events => self.live.entries().to_vec(),
        };
        self.visible = resolve(&self.sequence, &self.criteria)
            .into_iter()
            .cloned()
            .collect();
    }
}
