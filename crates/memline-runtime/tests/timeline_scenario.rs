//! End-to-end scenarios across normalization, aggregation, live deltas,
//! resolution, playback and selection.

use memline_engine::{PlaybackClock, SourceFilter, TickOutcome};
use memline_feed::extract_records;
use memline_runtime::{SessionConfig, TimelineSession, View};
use memline_types::{EntryKey, Feed, SourceKind};
use serde_json::json;

const NOW: f64 = 1_760_000_000.0;

/// Loads the three feeds from gateway-shaped JSON bodies.
fn scenario_session() -> TimelineSession {
    let stm = json!({
        "success": true,
        "data": [
            {"id": "s5", "timestamp": 5, "modality": "text", "content": "first thought"},
            {"id": "s15", "timestamp": 15, "modality": "speech", "content": "second thought"}
        ]
    });
    let ltm = json!({
        "success": true,
        "data": [{"id": "l10", "title": "Morning", "summary": "consolidated", "created_at": 10}]
    });
    let events = json!([
        {"embedding_id": "e1", "ts": 1, "source": "vision", "facets": {"vision.object": "cup"}},
        {"embedding_id": "e20", "ts": 20, "facets": {"speech.transcript": "hello"}}
    ]);

    let mut session = TimelineSession::new(SessionConfig::default());
    for (feed, body) in [(Feed::Stm, stm), (Feed::Ltm, ltm), (Feed::Events, events)] {
        let records = extract_records(feed, body).expect("gateway body decodes");
        session.ingest_at(feed, Ok(records), NOW);
    }
    session
}

fn order(session: &TimelineSession) -> Vec<(f64, SourceKind)> {
    session
        .ordered_visible_entries()
        .iter()
        .map(|e| (e.timestamp_seconds, e.source_kind))
        .collect()
}

#[test]
fn aggregate_filter_and_seek() {
    let mut session = scenario_session();

    assert_eq!(
        order(&session),
        vec![
            (1.0, SourceKind::Vision),
            (5.0, SourceKind::Stm),
            (10.0, SourceKind::Ltm),
            (15.0, SourceKind::Stm),
            (20.0, SourceKind::Speech),
        ]
    );

    session.set_filter(SourceFilter::Stm);
    let stm_only: Vec<f64> = order(&session).into_iter().map(|(t, _)| t).collect();
    assert_eq!(stm_only, vec![5.0, 15.0]);

    session.set_filter(SourceFilter::All);
    session.set_view(View::Memory);
    session.seek(12.0);
    let selected = session.selected_entry().expect("seek selects an entry");
    assert_eq!(selected.key(), EntryKey::new(SourceKind::Ltm, "l10"));
    assert_eq!(selected.title.as_deref(), Some("Morning"));
}

#[test]
fn redelivered_delta_is_kept_once() {
    let mut session = scenario_session();
    let delta = json!({
        "type": "vision.observation",
        "embedding_id": "x",
        "ts": 30,
        "clip_topk": [{"label": "plant", "score": 0.8}]
    })
    .to_string();

    let before = session.live().len();
    session.apply_frame_at(&delta, NOW).unwrap();
    session.apply_frame_at(&delta, NOW).unwrap();
    assert_eq!(session.live().len(), before + 1);

    let shown = session
        .ordered_visible_entries()
        .iter()
        .filter(|e| e.identity == "x")
        .count();
    assert_eq!(shown, 1);
}

#[test]
fn live_buffer_stays_bounded_under_a_flood() {
    let mut session = scenario_session();
    for i in 0..200 {
        let delta = json!({"type": "sentience.token", "ts": 100 + i, "embedding_id": format!("t{i}")})
            .to_string();
        session.apply_frame_at(&delta, NOW).unwrap();
    }
    assert_eq!(session.live().len(), 50);
    session.set_view(View::Events);
    assert_eq!(session.ordered_visible_entries().len(), 50);
    assert_eq!(session.ordered_visible_entries()[0].identity, "t150");
}

#[test]
fn playback_reaches_the_end_after_n_times_ten_ticks() {
    let mut session = scenario_session();
    let n = session.ordered_visible_entries().len();
    session.play();
    for tick in 1..=n * 10 {
        let outcome = session.tick();
        let cursor = session.playback_state().cursor_seconds;
        assert!(cursor <= PlaybackClock::bound(n));
        if tick == n * 10 {
            assert_eq!(outcome, TickOutcome::ReachedEnd);
        }
    }
    assert!(!session.playback_state().is_playing);
    assert_eq!(
        session.selected_entry().unwrap().key(),
        EntryKey::new(SourceKind::Speech, "e20")
    );
}

#[test]
fn selector_never_grows_the_visible_set() {
    use memline_engine::MemberSet;

    let mut session = scenario_session();
    let without = session.ordered_visible_entries().len();
    let all = MemberSet::from_entries("everything", session.ordered_visible_entries());
    session.set_cluster_selector(all);
    assert!(session.ordered_visible_entries().len() <= without);
    session.set_group_selector(MemberSet::new("nothing"));
    assert!(session.ordered_visible_entries().is_empty());
}
