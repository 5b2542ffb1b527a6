use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Facet names shared by the normalizer, the live delta parser and the
/// search resolver.
pub mod facet {
    pub const AFFECT_VALENCE: &str = "affect.valence";
    pub const AFFECT_AROUSAL: &str = "affect.arousal";
    pub const VISION_OBJECT: &str = "vision.object";
    pub const VISION_CONFIDENCE: &str = "vision.confidence";
    pub const VISION_CANDIDATES: &str = "vision.candidates";
    pub const SPEECH_TRANSCRIPT: &str = "speech.transcript";
    pub const SPEECH_CONFIDENCE: &str = "speech.confidence";
    pub const SPEECH_LANGUAGE: &str = "speech.language";
    pub const STM_MODALITY: &str = "stm.modality";
    pub const STM_TITLE: &str = "stm.title";
    pub const CONSOLIDATION_THEMES: &str = "consolidation.themes";
    pub const CONSOLIDATION_FROM: &str = "consolidation.consolidated_from";
}

/// Sparse, ordered facet map attached to every timeline entry.
pub type Facets = BTreeMap<String, Value>;

/// Origin discriminator of a [`TimelineEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Short-term-memory thought record.
    Stm,
    /// Long-term-memory consolidated experience.
    Ltm,
    /// Camera perception event.
    Vision,
    /// Microphone perception event.
    Speech,
    /// Any other perception event.
    Event,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Stm,
        SourceKind::Ltm,
        SourceKind::Vision,
        SourceKind::Speech,
        SourceKind::Event,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Stm => "stm",
            SourceKind::Ltm => "ltm",
            SourceKind::Vision => "vision",
            SourceKind::Speech => "speech",
            SourceKind::Event => "event",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = MemlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered)
            .ok_or_else(|| MemlineError::UnknownKind(s.to_string()))
    }
}

/// Deduplication and selection key: `(source_kind, identity)`.
///
/// Identities are only unique within a kind, so two entries with the same
/// identity but different kinds are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub kind: SourceKind,
    pub identity: String,
}

impl EntryKey {
    pub fn new(kind: SourceKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identity)
    }
}

/// Canonical timeline entry produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub source_kind: SourceKind,
    /// Epoch seconds; the single ordering key.
    pub timestamp_seconds: f64,
    pub identity: String,
    pub facets: Facets,
    pub content: String,
    pub tags: BTreeSet<String>,
    /// Consolidated-experience title (LTM only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Consolidated-experience summary (LTM only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl TimelineEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.source_kind, self.identity.clone())
    }

    /// Cheap key comparison that avoids cloning the identity.
    pub fn has_key(&self, key: &EntryKey) -> bool {
        self.source_kind == key.kind && self.identity == key.identity
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw source records
// ─────────────────────────────────────────────────────────────────────────────

/// A timestamp as it arrives on the wire: either a JSON number (seconds or
/// milliseconds) or a text form (RFC 3339 or a numeric string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Number(f64),
    Text(String),
}

/// Short-term-memory record as served by the memory service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StmRecord {
    pub id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    /// `vision`, `speech`, `text` or `concept`.
    pub modality: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub facets: Facets,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Long-term-memory consolidated experience.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LtmRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub consolidated_from: Vec<String>,
    pub created_at: Option<RawTimestamp>,
    pub consolidated_at: Option<RawTimestamp>,
    #[serde(default)]
    pub themes: Vec<String>,
    pub emotional_tone: Option<f64>,
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Perception event (camera, microphone or other sensor token).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionRecord {
    #[serde(alias = "id")]
    pub embedding_id: Option<String>,
    #[serde(alias = "timestamp")]
    pub ts: Option<RawTimestamp>,
    /// `vision`, `speech` or anything else.
    pub source: Option<String>,
    #[serde(default)]
    pub facets: Facets,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One raw record tagged with the source it was fetched from.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Stm(StmRecord),
    Ltm(LtmRecord),
    Perception(PerceptionRecord),
}

/// The three independent bulk sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    Stm,
    Ltm,
    Events,
}

impl Feed {
    pub const ALL: [Feed; 3] = [Feed::Stm, Feed::Ltm, Feed::Events];

    pub fn as_str(self) -> &'static str {
        match self {
            Feed::Stm => "stm",
            Feed::Ltm => "ltm",
            Feed::Events => "events",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error taxonomy of the timeline engine. None of these is fatal to a
/// session; each one degrades to "fewer entries visible".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemlineError {
    #[error("Normalization Error: {kind} record has no usable identity")]
    Normalization { kind: SourceKind },

    #[error("Source Fetch Error on {feed}: {details}")]
    SourceFetch { feed: Feed, details: String },

    #[error("Stream Parse Error: {0}")]
    StreamParse(String),

    #[error("Stream Disconnected: {0}")]
    StreamDisconnect(String),

    #[error("Unknown source kind: {0}")]
    UnknownKind(String),

    #[error("Session Closed")]
    SessionClosed,
}
