//! [`SessionDriver`] – runs a [`TimelineSession`] as a Tokio actor.
//!
//! The actor task is the only owner of the session, so engine state needs no
//! locks. Everything that can change it arrives through one `select!` loop:
//!
//! | Branch | Source |
//! |---|---|
//! | commands | [`SessionHandle`] methods, over an mpsc channel |
//! | bulk fetches | one task per feed in a [`JoinSet`], each delivered as it resolves |
//! | push stream | [`run_stream`] frames and state changes, over an mpsc channel |
//! | playback tick | a `tokio::time::Interval`, polled only while playing |
//!
//! After every event the actor publishes a fresh [`SessionSnapshot`] on a
//! `watch` channel. The selection has its own `watch` channel, straight from
//! the session's [`SelectionCell`](memline_engine::SelectionCell).
//!
//! Closing the handle (or dropping it) ends the actor; the fetch and stream
//! tasks live in `JoinSet`s owned by the actor and are aborted with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use memline_engine::{MemberSet, PlaybackState, Selection, SourceFilter, TickOutcome};
use memline_feed::{RecordSource, StreamMessage, run_stream};
use memline_types::{EntryKey, Feed, MemlineError, RawRecord, TimelineEntry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::session::{SessionConfig, SessionSnapshot, TimelineSession, View};

const COMMAND_BUFFER: usize = 64;
const STREAM_BUFFER: usize = 256;

/// Requests accepted by the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    Play,
    Pause,
    Reset,
    Seek(f64),
    SetSpeed(f64, oneshot::Sender<bool>),
    SetFilter(SourceFilter),
    SetSearch(String),
    SetCluster(MemberSet),
    SetGroup(MemberSet),
    ClearSelector,
    SetView(View),
    Select(EntryKey, oneshot::Sender<bool>),
    ClearSelection,
    /// Re-fetch all three bulk feeds.
    Refresh,
    Close,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionDriver (builder)
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a running session.
pub struct SessionDriver {
    config: SessionConfig,
    source: Arc<dyn RecordSource>,
    stream_url: Option<String>,
    reconnect_delay: Duration,
    frames: Option<mpsc::Receiver<StreamMessage>>,
}

impl SessionDriver {
    pub fn new(config: SessionConfig, source: Arc<dyn RecordSource>) -> Self {
        Self {
            config,
            source,
            stream_url: None,
            reconnect_delay: Duration::from_secs(3),
            frames: None,
        }
    }

    /// Open the push stream at `url` and keep it open.
    pub fn with_stream_url(mut self, url: impl Into<String>, reconnect_delay: Duration) -> Self {
        self.stream_url = Some(url.into());
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Take stream messages from an existing channel instead of dialing.
    pub fn with_stream_channel(mut self, frames: mpsc::Receiver<StreamMessage>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Spawn the actor on the current Tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let session = TimelineSession::new(self.config);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let selection_rx = session.subscribe_selection();

        let mut background = JoinSet::new();
        let frames = match (self.frames, self.stream_url) {
            (Some(frames), _) => Some(frames),
            (None, Some(url)) => {
                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                background.spawn(run_stream(url, self.reconnect_delay, tx));
                Some(rx)
            }
            (None, None) => None,
        };

        let actor = Actor {
            session,
            source: self.source,
            cmd_rx,
            snapshot_tx,
            frames,
            fetches: JoinSet::new(),
            pending: HashMap::new(),
            fetch_seq: 0,
            _background: background,
        };
        let task = tokio::spawn(actor.run());
        SessionHandle {
            cmd_tx,
            snapshot_rx,
            selection_rx,
            task: Some(task),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

struct Actor {
    session: TimelineSession,
    source: Arc<dyn RecordSource>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    frames: Option<mpsc::Receiver<StreamMessage>>,
    fetches: JoinSet<(Feed, u64, Result<Vec<RawRecord>, MemlineError>)>,
    /// Newest fetch per feed; older results for that feed are discarded.
    pending: HashMap<Feed, (u64, AbortHandle)>,
    fetch_seq: u64,
    /// Push-stream task; aborted when the actor ends.
    _background: JoinSet<()>,
}

impl Actor {
    async fn run(mut self) {
        info!("session started");
        self.fetch_all();

        let period = self.session.config().tick_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let playing = self.session.playback_state().is_playing;
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, SessionCommand::Close) {
                        break;
                    }
                    if matches!(cmd, SessionCommand::Play) && !playing {
                        // First tick one full period after pressing play.
                        ticker.reset();
                    }
                    self.handle(cmd);
                }
                Some(joined) = self.fetches.join_next() => {
                    match joined {
                        Ok((feed, seq, result)) => self.fetched(feed, seq, result),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => debug!(error = %e, "fetch task ended abnormally"),
                    }
                }
                Some(msg) = recv_frame(&mut self.frames) => {
                    match msg {
                        StreamMessage::Frame(text) => {
                            if let Err(e) = self.session.apply_frame(&text) {
                                debug!(error = %e, "live delta dropped");
                            }
                        }
                        StreamMessage::State(state) => self.session.set_stream_state(state),
                    }
                }
                _ = ticker.tick(), if playing => {
                    if self.session.tick() == TickOutcome::ReachedEnd {
                        debug!("playback auto-paused");
                    }
                }
            }
            self.snapshot_tx.send_replace(self.session.snapshot());
        }
        info!("session closed");
    }

    /// Start one fetch per feed, superseding any still in flight.
    fn fetch_all(&mut self) {
        for feed in Feed::ALL {
            self.fetch_seq += 1;
            let seq = self.fetch_seq;
            let source = Arc::clone(&self.source);
            let handle = self
                .fetches
                .spawn(async move { (feed, seq, source.fetch(feed).await) });
            if let Some((_, stale)) = self.pending.insert(feed, (seq, handle)) {
                stale.abort();
            }
        }
    }

    fn fetched(&mut self, feed: Feed, seq: u64, result: Result<Vec<RawRecord>, MemlineError>) {
        match self.pending.get(&feed) {
            Some((latest, _)) if *latest == seq => {
                self.pending.remove(&feed);
                self.session.ingest(feed, result);
            }
            _ => debug!(%feed, seq, "discarding superseded fetch"),
        }
    }

    fn handle(&mut self, cmd: SessionCommand) {
        if matches!(cmd, SessionCommand::Refresh) {
            self.fetch_all();
            return;
        }
        let session = &mut self.session;
        match cmd {
            SessionCommand::Play => session.play(),
            SessionCommand::Pause => session.pause(),
            SessionCommand::Reset => session.reset(),
            SessionCommand::Seek(seconds) => session.seek(seconds),
            SessionCommand::SetSpeed(speed, reply) => {
                let _ = reply.send(session.set_speed(speed));
            }
            SessionCommand::SetFilter(filter) => session.set_filter(filter),
            SessionCommand::SetSearch(query) => session.set_search(query),
            SessionCommand::SetCluster(members) => session.set_cluster_selector(members),
            SessionCommand::SetGroup(members) => session.set_group_selector(members),
            SessionCommand::ClearSelector => session.clear_selector(),
            SessionCommand::SetView(view) => session.set_view(view),
            SessionCommand::Select(key, reply) => {
                let found = session.select_entry(&key).is_some();
                let _ = reply.send(found);
            }
            SessionCommand::ClearSelection => {
                session.clear_selection();
            }
            SessionCommand::Refresh | SessionCommand::Close => {}
        }
    }
}

/// Receive from an optional channel. A missing or closed channel resolves
/// to `None` at once, which disables its `select!` branch for that pass.
async fn recv_frame(frames: &mut Option<mpsc::Receiver<StreamMessage>>) -> Option<StreamMessage> {
    match frames {
        Some(rx) => match rx.recv().await {
            Some(msg) => Some(msg),
            None => {
                *frames = None;
                None
            }
        },
        None => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Client side of a running session.
///
/// Reads come from `watch` snapshots and never wait on the actor. Writes are
/// queued to the actor and fail with [`MemlineError::SessionClosed`] once it
/// has stopped. Dropping the handle aborts the actor.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    selection_rx: watch::Receiver<Selection>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    async fn send(&self, cmd: SessionCommand) -> Result<(), MemlineError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| MemlineError::SessionClosed)
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn ordered_visible_entries(&self) -> Vec<TimelineEntry> {
        self.snapshot_rx.borrow().visible.clone()
    }

    pub fn selected_entry(&self) -> Option<TimelineEntry> {
        self.selection_rx.borrow().entry.clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.snapshot_rx.borrow().playback
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<Selection> {
        self.selection_rx.clone()
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Pick an entry. Resolves to `false` when no entry has `key`.
    pub async fn select_entry(&self, key: EntryKey) -> Result<bool, MemlineError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Select(key, reply)).await?;
        rx.await.map_err(|_| MemlineError::SessionClosed)
    }

    pub async fn clear_selection(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::ClearSelection).await
    }

    pub async fn play(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::Play).await
    }

    pub async fn pause(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::Pause).await
    }

    pub async fn reset(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::Reset).await
    }

    pub async fn seek(&self, seconds: f64) -> Result<(), MemlineError> {
        self.send(SessionCommand::Seek(seconds)).await
    }

    /// Resolves to `false` when `speed` was rejected.
    pub async fn set_speed(&self, speed: f64) -> Result<bool, MemlineError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SetSpeed(speed, reply)).await?;
        rx.await.map_err(|_| MemlineError::SessionClosed)
    }

    pub async fn set_filter(&self, filter: SourceFilter) -> Result<(), MemlineError> {
        self.send(SessionCommand::SetFilter(filter)).await
    }

    pub async fn set_search(&self, query: impl Into<String>) -> Result<(), MemlineError> {
        self.send(SessionCommand::SetSearch(query.into())).await
    }

    pub async fn set_cluster_selector(&self, members: MemberSet) -> Result<(), MemlineError> {
        self.send(SessionCommand::SetCluster(members)).await
    }

    pub async fn set_group_selector(&self, members: MemberSet) -> Result<(), MemlineError> {
        self.send(SessionCommand::SetGroup(members)).await
    }

    pub async fn clear_selector(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::ClearSelector).await
    }

    pub async fn set_view(&self, view: View) -> Result<(), MemlineError> {
        self.send(SessionCommand::SetView(view)).await
    }

    pub async fn refresh(&self) -> Result<(), MemlineError> {
        self.send(SessionCommand::Refresh).await
    }

    /// Stop the actor and wait for it, closing the push stream and timer.
    pub async fn close(mut self) {
        let _ = self.cmd_tx.send(SessionCommand::Close).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memline_feed::StreamState;
    use memline_types::{PerceptionRecord, RawTimestamp, SourceKind, StmRecord};
    use tokio::time::timeout;

    /// Serves canned records, or a failure for feeds without any.
    struct CannedSource {
        stm: Vec<RawRecord>,
        events: Vec<RawRecord>,
    }

    #[async_trait]
    impl RecordSource for CannedSource {
        async fn fetch(&self, feed: Feed) -> Result<Vec<RawRecord>, MemlineError> {
            match feed {
                Feed::Stm => Ok(self.stm.clone()),
                Feed::Events => Ok(self.events.clone()),
                Feed::Ltm => Err(MemlineError::SourceFetch {
                    feed,
                    details: "HTTP 500".into(),
                }),
            }
        }
    }

    fn source() -> Arc<dyn RecordSource> {
        let stm = |id: &str, ts: f64| {
            RawRecord::Stm(StmRecord {
                id: Some(id.into()),
                timestamp: Some(RawTimestamp::Number(ts)),
                ..Default::default()
            })
        };
        Arc::new(CannedSource {
            stm: vec![stm("a", 1.0), stm("b", 2.0)],
            events: vec![RawRecord::Perception(PerceptionRecord {
                embedding_id: Some("e".into()),
                ts: Some(RawTimestamp::Number(3.0)),
                ..Default::default()
            })],
        })
    }

    fn fast_config() -> SessionConfig {
        // Five virtual seconds per 5 ms tick.
        SessionConfig {
            tick_period: Duration::from_millis(5),
            speed_multiplier: 1000.0,
            ..SessionConfig::default()
        }
    }

    async fn wait_for(
        handle: &SessionHandle,
        what: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = handle.subscribe_snapshots();
        timeout(Duration::from_secs(5), rx.wait_for(|s| what(s)))
            .await
            .expect("condition not reached in time")
            .expect("session ended")
            .clone()
    }

    #[tokio::test]
    async fn bulk_sources_load_independently() {
        let handle = SessionDriver::new(fast_config(), source()).spawn();
        let snap = wait_for(&handle, |s| s.visible.len() == 3).await;
        assert_eq!(snap.source_errors.len(), 1);
        assert_eq!(snap.source_errors[0].0, Feed::Ltm);
        handle.close().await;
    }

    #[tokio::test]
    async fn playback_runs_to_the_end() {
        let handle = SessionDriver::new(fast_config(), source()).spawn();
        wait_for(&handle, |s| s.visible.len() == 3).await;
        handle.play().await.unwrap();
        let snap = wait_for(&handle, |s| {
            !s.playback.is_playing && s.playback.cursor_seconds == 30.0
        })
        .await;
        assert_eq!(snap.playback.cursor_seconds, 30.0);
        assert_eq!(handle.selected_entry().unwrap().identity, "e");
        handle.close().await;
    }

    #[tokio::test]
    async fn commands_reach_the_session() {
        let handle = SessionDriver::new(fast_config(), source()).spawn();
        wait_for(&handle, |s| s.visible.len() == 3).await;

        handle.set_filter(SourceFilter::Stm).await.unwrap();
        wait_for(&handle, |s| s.visible.len() == 2).await;

        assert!(handle.select_entry(EntryKey::new(SourceKind::Stm, "b")).await.unwrap());
        assert!(!handle.select_entry(EntryKey::new(SourceKind::Ltm, "b")).await.unwrap());
        assert_eq!(handle.selected_entry().unwrap().identity, "b");

        assert!(!handle.set_speed(0.0).await.unwrap());
        assert!(handle.set_speed(2.0).await.unwrap());
        handle.close().await;
    }

    #[tokio::test]
    async fn stream_frames_are_applied_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let handle = SessionDriver::new(fast_config(), source())
            .with_stream_channel(rx)
            .spawn();
        tx.send(StreamMessage::State(StreamState::Connected)).await.unwrap();
        let frame = r#"{"type":"sentience.token","ts":9,"embedding_id":"x","facets":{"vision.object":"cup"}}"#;
        tx.send(StreamMessage::Frame(frame.into())).await.unwrap();
        tx.send(StreamMessage::Frame(frame.into())).await.unwrap();
        tx.send(StreamMessage::Frame("garbage".into())).await.unwrap();

        let snap = wait_for(&handle, |s| {
            s.live_len == 1 && s.status.stream() == StreamState::Connected && s.visible.len() == 4
        })
        .await;
        assert_eq!(snap.visible.last().unwrap().identity, "x");
        assert_eq!(handle.selected_entry().unwrap().identity, "x");
        handle.close().await;
    }

    /// First STM fetch is slow and stale; every later one answers at once.
    struct SlowFirstSource {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RecordSource for SlowFirstSource {
        async fn fetch(&self, feed: Feed) -> Result<Vec<RawRecord>, MemlineError> {
            use std::sync::atomic::Ordering;
            if feed != Feed::Stm {
                return Ok(Vec::new());
            }
            let id = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "stale"
            } else {
                "fresh"
            };
            Ok(vec![RawRecord::Stm(StmRecord {
                id: Some(id.into()),
                timestamp: Some(RawTimestamp::Number(1.0)),
                ..Default::default()
            })])
        }
    }

    #[tokio::test]
    async fn refresh_supersedes_a_slow_earlier_fetch() {
        let source = Arc::new(SlowFirstSource {
            calls: Default::default(),
        });
        let handle = SessionDriver::new(fast_config(), source.clone()).spawn();
        while source.calls.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        handle.refresh().await.unwrap();
        wait_for(&handle, |s| s.visible.iter().any(|e| e.identity == "fresh")).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        let ids: Vec<String> = handle
            .ordered_visible_entries()
            .into_iter()
            .map(|e| e.identity)
            .collect();
        assert_eq!(ids, vec!["fresh"]);
        handle.close().await;
    }

    #[tokio::test]
    async fn closed_session_rejects_commands() {
        let handle = SessionDriver::new(fast_config(), source()).spawn();
        let sender = handle.cmd_tx.clone();
        handle.close().await;
        assert!(sender.send(SessionCommand::Play).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_actor() {
        let (tx, rx) = mpsc::channel(8);
        let handle = SessionDriver::new(fast_config(), source())
            .with_stream_channel(rx)
            .spawn();
        drop(handle);
        // Once the actor is gone its receiver is dropped too.
        timeout(Duration::from_secs(5), tx.closed())
            .await
            .expect("actor still running");
    }
}
