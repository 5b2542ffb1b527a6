//! Merge-Sort Aggregator.
//!
//! [`aggregate`] is a pure function of its three inputs: it concatenates
//! STM, LTM and event entries (in that order) and stable-sorts them by
//! `timestamp_seconds`. Entries with equal timestamps therefore keep their
//! source-array arrival order. Callers re-run the full merge whenever any
//! source refreshes; there is no incremental patching.

use std::collections::HashSet;

use memline_types::{EntryKey, MemlineError, TimelineEntry};
use tracing::warn;

/// Merge three normalized sources into one ascending, stably tied sequence.
pub fn aggregate(
    stm: &[TimelineEntry],
    ltm: &[TimelineEntry],
    events: &[TimelineEntry],
) -> Vec<TimelineEntry> {
    let mut merged = Vec::with_capacity(stm.len() + ltm.len() + events.len());
    merged.extend_from_slice(stm);
    merged.extend_from_slice(ltm);
    merged.extend_from_slice(events);
    sort_chronologically(&mut merged);
    merged
}

/// Same as [`aggregate`], but a failed source contributes nothing instead of
/// failing the whole merge.
pub fn aggregate_results(
    stm: &Result<Vec<TimelineEntry>, MemlineError>,
    ltm: &Result<Vec<TimelineEntry>, MemlineError>,
    events: &Result<Vec<TimelineEntry>, MemlineError>,
) -> Vec<TimelineEntry> {
    aggregate(or_empty(stm), or_empty(ltm), or_empty(events))
}

fn or_empty(source: &Result<Vec<TimelineEntry>, MemlineError>) -> &[TimelineEntry] {
    match source {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "source unavailable; treating as empty");
            &[]
        }
    }
}

/// Stable ascending sort by timestamp. `total_cmp` keeps the order total even
/// if a NaN ever slipped past the clock resolver.
pub fn sort_chronologically(entries: &mut [TimelineEntry]) {
    entries.sort_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds));
}

/// Append `live` entries to `bulk`, skipping any `(kind, identity)` pair
/// that is already present. Bulk entries win over live redeliveries.
pub fn with_live(bulk: &[TimelineEntry], live: &[TimelineEntry]) -> Vec<TimelineEntry> {
    let known: HashSet<EntryKey> = bulk.iter().map(TimelineEntry::key).collect();
    let mut merged = bulk.to_vec();
    merged.extend(live.iter().filter(|e| !known.contains(&e.key())).cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use memline_types::{Facets, MemlineError, SourceKind, Feed};
    use std::collections::BTreeSet;

    fn entry(kind: SourceKind, id: &str, ts: f64) -> TimelineEntry {
        TimelineEntry {
            source_kind: kind,
            timestamp_seconds: ts,
            identity: id.to_string(),
            facets: Facets::new(),
            content: String::new(),
            tags: BTreeSet::new(),
            title: None,
            summary: None,
        }
    }

    fn timestamps(entries: &[TimelineEntry]) -> Vec<f64> {
        entries.iter().map(|e| e.timestamp_seconds).collect()
    }

    #[test]
    fn merges_three_sources_in_time_order() {
        let stm = vec![entry(SourceKind::Stm, "s5", 5.0), entry(SourceKind::Stm, "s15", 15.0)];
        let ltm = vec![entry(SourceKind::Ltm, "l10", 10.0)];
        let events = vec![
            entry(SourceKind::Event, "e1", 1.0),
            entry(SourceKind::Event, "e20", 20.0),
        ];
        let merged = aggregate(&stm, &ltm, &events);
        assert_eq!(timestamps(&merged), vec![1.0, 5.0, 10.0, 15.0, 20.0]);
        let kinds: Vec<SourceKind> = merged.iter().map(|e| e.source_kind).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Event,
                SourceKind::Stm,
                SourceKind::Ltm,
                SourceKind::Stm,
                SourceKind::Event
            ]
        );
    }

    #[test]
    fn unsorted_inputs_are_sorted() {
        let stm = vec![entry(SourceKind::Stm, "b", 9.0), entry(SourceKind::Stm, "a", 3.0)];
        let merged = aggregate(&stm, &[], &[]);
        assert_eq!(timestamps(&merged), vec![3.0, 9.0]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let stm = vec![entry(SourceKind::Stm, "first", 7.0)];
        let ltm = vec![entry(SourceKind::Ltm, "second", 7.0)];
        let events = vec![
            entry(SourceKind::Vision, "third", 7.0),
            entry(SourceKind::Vision, "fourth", 7.0),
        ];
        let merged = aggregate(&stm, &ltm, &events);
        let ids: Vec<&str> = merged.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn empty_inputs_are_fine() {
        assert!(aggregate(&[], &[], &[]).is_empty());
        let ltm = vec![entry(SourceKind::Ltm, "only", 1.0)];
        assert_eq!(aggregate(&[], &ltm, &[]).len(), 1);
    }

    #[test]
    fn rerunning_is_identical() {
        let stm = vec![entry(SourceKind::Stm, "a", 2.0), entry(SourceKind::Stm, "b", 2.0)];
        let events = vec![entry(SourceKind::Speech, "c", 1.0)];
        let first = aggregate(&stm, &[], &events);
        let second = aggregate(&stm, &[], &events);
        assert_eq!(first, second);
    }

    #[test]
    fn failed_source_is_treated_as_empty() {
        let stm = Ok(vec![entry(SourceKind::Stm, "a", 2.0)]);
        let ltm = Err(MemlineError::SourceFetch {
            feed: Feed::Ltm,
            details: "HTTP 500".into(),
        });
        let events = Ok(vec![entry(SourceKind::Vision, "v", 1.0)]);
        let merged = aggregate_results(&stm, &ltm, &events);
        assert_eq!(timestamps(&merged), vec![1.0, 2.0]);
    }

    #[test]
    fn with_live_skips_known_keys() {
        let bulk = vec![entry(SourceKind::Vision, "x", 1.0)];
        let live = vec![
            entry(SourceKind::Vision, "x", 3.0),
            entry(SourceKind::Speech, "x", 4.0),
        ];
        let merged = with_live(&bulk, &live);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].timestamp_seconds, 1.0);
        assert_eq!(merged[1].source_kind, SourceKind::Speech);
    }
}
