//! Live Delta Applier.
//!
//! The gateway pushes one JSON object per delta over a long-lived stream.
//! Deltas arrive one at a time and not necessarily in timestamp order.
//! [`parse_delta`] decodes a single payload into a [`Delta`]; a
//! [`LiveBuffer`] folds accepted deltas into a bounded, de-duplicated,
//! timestamp-ordered buffer.
//!
//! # Delta types
//!
//! | `type` | Effect |
//! |---|---|
//! | `connection`, `ping` | liveness only, never inserted |
//! | `service.status` | connectivity indicator, never inserted |
//! | `sentience.token` | perception entry (kind from facets) |
//! | `vision.observation` | vision entry, top CLIP label as `vision.object` |
//! | `speech.transcript` | speech entry |
//! | `ego.thought` | STM entry |
//!
//! Anything else is a [`MemlineError::StreamParse`].

use std::collections::HashSet;

use memline_types::{
    EntryKey, Facets, MemlineError, PerceptionRecord, RawRecord, RawTimestamp, StmRecord,
    TimelineEntry, facet,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::normalize::normalize;

/// Number of live entries retained for the events view.
pub const DEFAULT_RETENTION: usize = 50;

/// A decoded push-stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Handshake sent once per connection.
    Connection,
    /// Keep-alive.
    Ping,
    /// Upstream service health report.
    ServiceStatus { service: String, online: bool },
    /// A record to insert into the buffer.
    Record(RawRecord),
}

/// Result of applying one delta to a [`LiveBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new entry was inserted, pushing out the oldest one if the buffer
    /// was full.
    Inserted {
        key: EntryKey,
        evicted: Option<EntryKey>,
    },
    /// The key was already present; the buffer is unchanged.
    Duplicate(EntryKey),
    /// The entry was older than everything retained in a full buffer.
    Evicted(EntryKey),
    /// A liveness or handshake signal.
    Control,
    /// A service health report.
    ServiceStatus { service: String, online: bool },
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ServiceStatusWire {
    service: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct ClipLabel {
    label: String,
    #[serde(default)]
    score: f64,
}

#[derive(Deserialize)]
struct VisionObservationWire {
    embedding_id: Option<String>,
    #[serde(alias = "timestamp")]
    ts: Option<RawTimestamp>,
    #[serde(default)]
    clip_topk: Vec<ClipLabel>,
}

#[derive(Deserialize)]
struct SpeechTranscriptWire {
    embedding_id: Option<String>,
    #[serde(alias = "timestamp")]
    ts: Option<RawTimestamp>,
    transcript: Option<String>,
    confidence: Option<f64>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct EgoThoughtWire {
    thought: ThoughtWire,
}

#[derive(Deserialize)]
struct ThoughtWire {
    id: Option<String>,
    title: Option<String>,
    thought: Option<String>,
    generated_at: Option<RawTimestamp>,
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, kind: &str) -> Result<T, MemlineError> {
    serde_json::from_value(value)
        .map_err(|e| MemlineError::StreamParse(format!("malformed {kind} delta: {e}")))
}

/// Decode one push-stream payload.
pub fn parse_delta(text: &str) -> Result<Delta, MemlineError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MemlineError::StreamParse(format!("invalid JSON: {e}")))?;
    let envelope: Envelope = decode(value.clone(), "untyped")?;
    let kind = envelope
        .kind
        .ok_or_else(|| MemlineError::StreamParse("delta has no type".to_string()))?;

    match kind.as_str() {
        "connection" => Ok(Delta::Connection),
        "ping" => Ok(Delta::Ping),
        "service.status" => {
            let wire: ServiceStatusWire = decode(value, &kind)?;
            let service = wire.service.ok_or_else(|| {
                MemlineError::StreamParse("service.status without service".to_string())
            })?;
            let online = wire.status.as_deref() == Some("online");
            Ok(Delta::ServiceStatus { service, online })
        }
        "sentience.token" => {
            let record: PerceptionRecord = decode(value, &kind)?;
            Ok(Delta::Record(RawRecord::Perception(record)))
        }
        "vision.observation" => {
            let wire: VisionObservationWire = decode(value, &kind)?;
            let mut facets = Facets::new();
            if let Some(top) = wire.clip_topk.first() {
                facets.insert(facet::VISION_OBJECT.to_string(), json!(top.label));
                facets.insert(facet::VISION_CONFIDENCE.to_string(), json!(top.score));
            }
            let candidates: Vec<&str> = wire.clip_topk.iter().map(|c| c.label.as_str()).collect();
            facets.insert(facet::VISION_CANDIDATES.to_string(), json!(candidates));
            Ok(Delta::Record(RawRecord::Perception(PerceptionRecord {
                embedding_id: wire.embedding_id,
                ts: wire.ts,
                source: Some("vision".to_string()),
                facets,
                tags: vec![],
            })))
        }
        "speech.transcript" => {
            let wire: SpeechTranscriptWire = decode(value, &kind)?;
            let mut facets = Facets::new();
            if let Some(transcript) = wire.transcript {
                facets.insert(facet::SPEECH_TRANSCRIPT.to_string(), json!(transcript));
            }
            if let Some(confidence) = wire.confidence {
                facets.insert(facet::SPEECH_CONFIDENCE.to_string(), json!(confidence));
            }
            if let Some(language) = wire.language {
                facets.insert(facet::SPEECH_LANGUAGE.to_string(), json!(language));
            }
            Ok(Delta::Record(RawRecord::Perception(PerceptionRecord {
                embedding_id: wire.embedding_id,
                ts: wire.ts,
                source: Some("speech".to_string()),
                facets,
                tags: vec![],
            })))
        }
        "ego.thought" => {
            let wire: EgoThoughtWire = decode(value, &kind)?;
            let mut facets = Facets::new();
            if let Some(title) = wire.thought.title {
                facets.insert(facet::STM_TITLE.to_string(), json!(title));
            }
            Ok(Delta::Record(RawRecord::Stm(StmRecord {
                id: wire.thought.id,
                timestamp: wire.thought.generated_at,
                modality: Some("text".to_string()),
                content: wire.thought.thought,
                facets,
                tags: vec![],
            })))
        }
        other => Err(MemlineError::StreamParse(format!(
            "unknown delta type '{other}'"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LiveBuffer
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded buffer of live entries, ordered by timestamp.
///
/// Inserts are idempotent by `(kind, identity)`; once the buffer holds
/// `capacity` entries, the oldest (smallest timestamp) is dropped first.
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    entries: Vec<TimelineEntry>,
    keys: HashSet<EntryKey>,
    capacity: usize,
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl LiveBuffer {
    /// Create an empty buffer. A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity + 1),
            keys: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.keys.contains(key)
    }

    pub fn get(&self, key: &EntryKey) -> Option<&TimelineEntry> {
        if !self.contains(key) {
            return None;
        }
        self.entries.iter().find(|e| e.has_key(key))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Insert a normalized entry.
    ///
    /// Ties are placed after existing entries with the same timestamp so that
    /// arrival order is preserved.
    pub fn insert(&mut self, entry: TimelineEntry) -> ApplyOutcome {
        let key = entry.key();
        if self.keys.contains(&key) {
            return ApplyOutcome::Duplicate(key);
        }
        let ts = entry.timestamp_seconds;
        let at = self
            .entries
            .partition_point(|e| e.timestamp_seconds.total_cmp(&ts).is_le());
        self.entries.insert(at, entry);
        self.keys.insert(key.clone());

        // At most one entry is over capacity after a single insert.
        let evicted = if self.entries.len() > self.capacity {
            let dropped = self.entries.remove(0).key();
            self.keys.remove(&dropped);
            Some(dropped)
        } else {
            None
        };
        match evicted {
            Some(dropped) if dropped == key => ApplyOutcome::Evicted(key),
            evicted => ApplyOutcome::Inserted { key, evicted },
        }
    }

    /// Apply one decoded delta. `now` stamps records without a timestamp.
    pub fn apply(&mut self, delta: Delta, now: f64) -> Result<ApplyOutcome, MemlineError> {
        match delta {
            Delta::Connection | Delta::Ping => Ok(ApplyOutcome::Control),
            Delta::ServiceStatus { service, online } => {
                Ok(ApplyOutcome::ServiceStatus { service, online })
            }
            Delta::Record(record) => {
                let entry = normalize(&record, now)?;
                Ok(self.insert(entry))
            }
        }
    }

    /// Parse and apply a raw payload.
    ///
    /// Errors are returned for logging only; the buffer is never left in a
    /// partial state.
    pub fn apply_text(&mut self, text: &str, now: f64) -> Result<ApplyOutcome, MemlineError> {
        let delta = parse_delta(text).inspect_err(|e| debug!(error = %e, "dropping delta"))?;
        self.apply(delta, now)
    }
}
