//! Filter/Search/Cluster Resolver.
//!
//! [`resolve`] narrows an ordered entry sequence with up to three criteria,
//! composed by logical AND and applied in input order:
//!
//! 1. **Source filter** – one [`SourceFilter`] value.
//! 2. **Search** – case-insensitive substring over the kind name and every
//!    stringified facet value.
//! 3. **Selector** – membership of one externally computed cluster *or*
//!    semantic group (never both).
//!
//! The resolver never reorders and never grows its input, so adding a
//! selector can only shrink the visible set.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use memline_types::{EntryKey, MemlineError, SourceKind, TimelineEntry};
use serde_json::Value;

/// Timestamp tolerance for membership fallback matching.
const TIMESTAMP_EPSILON: f64 = 1e-6;

/// Which source kinds are visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceFilter {
    #[default]
    All,
    Vision,
    Speech,
    Stm,
    Ltm,
}

impl SourceFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFilter::All => "all",
            SourceFilter::Vision => "vision",
            SourceFilter::Speech => "speech",
            SourceFilter::Stm => "stm",
            SourceFilter::Ltm => "ltm",
        }
    }

    pub fn admits(self, kind: SourceKind) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::Vision => kind == SourceKind::Vision,
            SourceFilter::Speech => kind == SourceKind::Speech,
            SourceFilter::Stm => kind == SourceKind::Stm,
            SourceFilter::Ltm => kind == SourceKind::Ltm,
        }
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFilter {
    type Err = MemlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(SourceFilter::All),
            "vision" => Ok(SourceFilter::Vision),
            "speech" => Ok(SourceFilter::Speech),
            "stm" => Ok(SourceFilter::Stm),
            "ltm" => Ok(SourceFilter::Ltm),
            _ => Err(MemlineError::UnknownKind(s.to_string())),
        }
    }
}

/// One cluster or group member, as the clustering pass reported it.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Key(EntryKey),
    /// A member whose identity was not kept; matched by timestamp.
    Timestamp(f64),
}

/// Members of one cluster or semantic group.
///
/// Membership is decided by [`EntryKey`]. Only members reported without an
/// identity fall back to timestamp matching, so a keyed member never admits
/// a different entry that happens to share its timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberSet {
    pub name: String,
    keys: HashSet<EntryKey>,
    keyless: Vec<f64>,
}

impl MemberSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_member(self, member: Member) -> Self {
        match member {
            Member::Key(key) => self.with_key(key),
            Member::Timestamp(ts) => self.with_timestamp(ts),
        }
    }

    pub fn with_key(mut self, key: EntryKey) -> Self {
        self.keys.insert(key);
        self
    }

    pub fn with_timestamp(mut self, ts: f64) -> Self {
        self.keyless.push(ts);
        self
    }

    /// Build a member set from entries, by key.
    pub fn from_entries<'a>(
        name: impl Into<String>,
        entries: impl IntoIterator<Item = &'a TimelineEntry>,
    ) -> Self {
        let mut set = Self::new(name);
        set.keys.extend(entries.into_iter().map(TimelineEntry::key));
        set
    }

    pub fn contains_key(&self, key: &EntryKey) -> bool {
        self.keys.contains(key)
    }

    pub fn contains(&self, entry: &TimelineEntry) -> bool {
        if self.keys.contains(&entry.key()) {
            return true;
        }
        self.keyless
            .iter()
            .any(|ts| (ts - entry.timestamp_seconds).abs() <= TIMESTAMP_EPSILON)
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.keyless.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.keyless.is_empty()
    }
}

/// The single active membership restriction.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Cluster(MemberSet),
    Group(MemberSet),
}

impl Selector {
    pub fn members(&self) -> &MemberSet {
        match self {
            Selector::Cluster(set) | Selector::Group(set) => set,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Selector::Cluster(set) => format!("cluster '{}'", set.name),
            Selector::Group(set) => format!("group '{}'", set.name),
        }
    }
}

/// All simultaneous criteria.
///
/// The selector slot holds at most one of a cluster or a group; the setters
/// replace whatever was there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub source: SourceFilter,
    pub search: String,
    selector: Option<Selector>,
}

impl Criteria {
    pub fn with_source(mut self, source: SourceFilter) -> Self {
        self.source = source;
        self
    }

    pub fn with_search(mut self, query: impl Into<String>) -> Self {
        self.search = query.into();
        self
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// Restrict to a cluster. Clears any active group.
    pub fn set_cluster(&mut self, members: MemberSet) {
        self.selector = Some(Selector::Cluster(members));
    }

    /// Restrict to a semantic group. Clears any active cluster.
    pub fn set_group(&mut self, members: MemberSet) {
        self.selector = Some(Selector::Group(members));
    }

    pub fn clear_selector(&mut self) {
        self.selector = None;
    }
}

/// Compute the visible subset of `entries`, preserving order.
pub fn resolve<'a>(entries: &'a [TimelineEntry], criteria: &Criteria) -> Vec<&'a TimelineEntry> {
    let needle = criteria.search.trim().to_lowercase();
    entries
        .iter()
        .filter(|e| criteria.source.admits(e.source_kind))
        .filter(|e| needle.is_empty() || matches_search(e, &needle))
        .filter(|e| criteria.selector.as_ref().is_none_or(|s| s.members().contains(e)))
        .collect()
}

/// `needle` must already be lower-cased and non-empty.
fn matches_search(entry: &TimelineEntry, needle: &str) -> bool {
    if entry.source_kind.as_str().contains(needle) {
        return true;
    }
    entry
        .facets
        .values()
        .any(|value| stringify(value).to_lowercase().contains(needle))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memline_types::Facets;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn entry(kind: SourceKind, id: &str, ts: f64, facets: &[(&str, Value)]) -> TimelineEntry {
        TimelineEntry {
            source_kind: kind,
            timestamp_seconds: ts,
            identity: id.to_string(),
            facets: facets
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<Facets>(),
            content: String::new(),
            tags: BTreeSet::new(),
            title: None,
            summary: None,
        }
    }

    fn sample() -> Vec<TimelineEntry> {
        vec![
            entry(SourceKind::Event, "e1", 1.0, &[]),
            entry(SourceKind::Stm, "s5", 5.0, &[("stm.modality", json!("text"))]),
            entry(SourceKind::Ltm, "l10", 10.0, &[("affect.valence", json!(0.75))]),
            entry(SourceKind::Stm, "s15", 15.0, &[]),
            entry(
                SourceKind::Vision,
                "v20",
                20.0,
                &[("vision.object", json!("Red Cup"))],
            ),
        ]
    }

    fn ids(visible: &[&TimelineEntry]) -> Vec<String> {
        visible.iter().map(|e| e.identity.clone()).collect()
    }

    #[test]
    fn unrestricted_criteria_keep_everything_in_order() {
        let entries = sample();
        let visible = resolve(&entries, &Criteria::default());
        assert_eq!(ids(&visible), vec!["e1", "s5", "l10", "s15", "v20"]);
    }

    #[test]
    fn source_filter_keeps_matching_kind() {
        let entries = sample();
        let criteria = Criteria::default().with_source(SourceFilter::Stm);
        let visible = resolve(&entries, &criteria);
        let ts: Vec<f64> = visible.iter().map(|e| e.timestamp_seconds).collect();
        assert_eq!(ts, vec![5.0, 15.0]);
    }

    #[test]
    fn search_is_case_insensitive_over_facets() {
        let entries = sample();
        let visible = resolve(&entries, &Criteria::default().with_search("red cup"));
        assert_eq!(ids(&visible), vec!["v20"]);
        // Non-string facets are matched through their JSON form.
        let visible = resolve(&entries, &Criteria::default().with_search("0.75"));
        assert_eq!(ids(&visible), vec!["l10"]);
    }

    #[test]
    fn search_matches_kind_name() {
        let entries = sample();
        let visible = resolve(&entries, &Criteria::default().with_search("LTM"));
        assert_eq!(ids(&visible), vec!["l10"]);
    }

    #[test]
    fn blank_search_matches_everything() {
        let entries = sample();
        let visible = resolve(&entries, &Criteria::default().with_search("   "));
        assert_eq!(visible.len(), entries.len());
    }

    #[test]
    fn selector_matches_by_key_then_timestamp() {
        let entries = sample();
        let mut criteria = Criteria::default();
        criteria.set_cluster(
            MemberSet::new("morning")
                .with_key(EntryKey::new(SourceKind::Stm, "s5"))
                .with_timestamp(20.0),
        );
        assert_eq!(ids(&resolve(&entries, &criteria)), vec!["s5", "v20"]);
    }

    #[test]
    fn keyed_members_do_not_admit_timestamp_neighbours() {
        let entries = vec![
            entry(SourceKind::Stm, "a", 7.0, &[]),
            entry(SourceKind::Vision, "b", 7.0, &[]),
        ];
        let mut criteria = Criteria::default();
        criteria.set_cluster(MemberSet::from_entries("c", &entries[..1]));
        assert_eq!(ids(&resolve(&entries, &criteria)), vec!["a"]);
    }

    #[test]
    fn keyless_members_match_every_entry_at_their_timestamp() {
        let entries = vec![
            entry(SourceKind::Stm, "a", 7.0, &[]),
            entry(SourceKind::Vision, "b", 7.0, &[]),
            entry(SourceKind::Vision, "c", 8.0, &[]),
        ];
        let set = MemberSet::new("g")
            .with_member(Member::Timestamp(7.0))
            .with_member(Member::Key(EntryKey::new(SourceKind::Vision, "c")));
        assert_eq!(set.len(), 2);
        let mut criteria = Criteria::default();
        criteria.set_group(set);
        assert_eq!(ids(&resolve(&entries, &criteria)), vec!["a", "b", "c"]);
    }

    #[test]
    fn key_match_respects_kind() {
        let entries = sample();
        let mut criteria = Criteria::default();
        criteria.set_group(MemberSet::new("g").with_key(EntryKey::new(SourceKind::Ltm, "s5")));
        assert!(resolve(&entries, &criteria).is_empty());
    }

    #[test]
    fn cluster_and_group_are_mutually_exclusive() {
        let mut criteria = Criteria::default();
        criteria.set_cluster(MemberSet::new("c"));
        criteria.set_group(MemberSet::new("g"));
        assert!(matches!(criteria.selector(), Some(Selector::Group(_))));
        criteria.set_cluster(MemberSet::new("c"));
        assert!(matches!(criteria.selector(), Some(Selector::Cluster(_))));
        criteria.clear_selector();
        assert!(criteria.selector().is_none());
    }

    #[test]
    fn criteria_compose_by_and() {
        let entries = sample();
        let mut criteria = Criteria::default()
            .with_source(SourceFilter::Stm)
            .with_search("text");
        assert_eq!(ids(&resolve(&entries, &criteria)), vec!["s5"]);
        criteria.set_cluster(MemberSet::new("c").with_key(EntryKey::new(SourceKind::Stm, "s15")));
        assert!(resolve(&entries, &criteria).is_empty());
    }

    #[test]
    fn adding_a_selector_never_grows_the_visible_set() {
        let entries = sample();
        let filters = [
            SourceFilter::All,
            SourceFilter::Vision,
            SourceFilter::Speech,
            SourceFilter::Stm,
            SourceFilter::Ltm,
        ];
        let members = [
            MemberSet::new("empty"),
            MemberSet::from_entries("all", &entries),
            MemberSet::new("one").with_timestamp(10.0),
        ];
        for source in filters {
            for query in ["", "stm", "cup", "zzz"] {
                let base = Criteria::default().with_source(source).with_search(query);
                let without = resolve(&entries, &base).len();
                for set in &members {
                    let mut with = base.clone();
                    with.set_group(set.clone());
                    assert!(resolve(&entries, &with).len() <= without);
                }
            }
        }
    }

    #[test]
    fn source_filter_parses() {
        assert_eq!("STM".parse::<SourceFilter>().unwrap(), SourceFilter::Stm);
        assert_eq!("".parse::<SourceFilter>().unwrap(), SourceFilter::All);
        assert!("event".parse::<SourceFilter>().is_err());
    }
}
