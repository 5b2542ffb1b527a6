//! Record Normalizer.
//!
//! Converts each [`RawRecord`] variant into exactly one [`TimelineEntry`].
//! The match over the variants is exhaustive, so a new source shape cannot be
//! added without deciding how it normalizes.
//!
//! A record fails normalization only when it has no usable identity (missing
//! or blank id); everything else is best effort. Timestamps go through the
//! [`clock`](crate::clock) resolver and content is synthesized from facets
//! where the source does not carry prose.

use std::collections::BTreeSet;

use memline_types::{
    Facets, LtmRecord, MemlineError, PerceptionRecord, RawRecord, SourceKind, StmRecord,
    TimelineEntry, facet,
};
use serde_json::{Value, json};
use tracing::debug;

use crate::clock::resolve_timestamp;

/// Normalize one raw record. `now` is substituted for unusable timestamps.
pub fn normalize(record: &RawRecord, now: f64) -> Result<TimelineEntry, MemlineError> {
    match record {
        RawRecord::Stm(stm) => normalize_stm(stm, now),
        RawRecord::Ltm(ltm) => normalize_ltm(ltm, now),
        RawRecord::Perception(event) => normalize_perception(event, now),
    }
}

/// Normalize a batch, dropping (and logging) records without an identity.
pub fn normalize_all(records: &[RawRecord], now: f64) -> Vec<TimelineEntry> {
    records
        .iter()
        .filter_map(|record| match normalize(record, now) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "dropping record");
                None
            }
        })
        .collect()
}

fn normalize_stm(record: &StmRecord, now: f64) -> Result<TimelineEntry, MemlineError> {
    let identity = usable_identity(record.id.as_deref()).ok_or(MemlineError::Normalization {
        kind: SourceKind::Stm,
    })?;
    let mut facets = record.facets.clone();
    if let Some(modality) = &record.modality {
        facets.insert(facet::STM_MODALITY.to_string(), Value::String(modality.clone()));
    }
    let content = synthesize_content(SourceKind::Stm, &facets, record.content.as_deref());
    Ok(TimelineEntry {
        source_kind: SourceKind::Stm,
        timestamp_seconds: resolve_timestamp(record.timestamp.as_ref(), now),
        identity,
        facets,
        content,
        tags: collect_tags(&record.tags),
        title: None,
        summary: None,
    })
}

fn normalize_ltm(record: &LtmRecord, now: f64) -> Result<TimelineEntry, MemlineError> {
    let identity = usable_identity(record.id.as_deref()).ok_or(MemlineError::Normalization {
        kind: SourceKind::Ltm,
    })?;

    let mut facets = Facets::new();
    if let Some(tone) = record.emotional_tone {
        facets.insert(facet::AFFECT_VALENCE.to_string(), json!(tone));
    }
    if let Some(importance) = record.importance {
        facets.insert(facet::AFFECT_AROUSAL.to_string(), json!(importance));
    }
    facets.insert(facet::CONSOLIDATION_THEMES.to_string(), json!(record.themes));
    facets.insert(
        facet::CONSOLIDATION_FROM.to_string(),
        json!(record.consolidated_from),
    );

    let timestamp = record.created_at.as_ref().or(record.consolidated_at.as_ref());
    let content = synthesize_content(SourceKind::Ltm, &facets, record.summary.as_deref());
    Ok(TimelineEntry {
        source_kind: SourceKind::Ltm,
        timestamp_seconds: resolve_timestamp(timestamp, now),
        identity,
        facets,
        content,
        tags: collect_tags(&record.tags),
        title: record.title.clone(),
        summary: record.summary.clone(),
    })
}

fn normalize_perception(
    record: &PerceptionRecord,
    now: f64,
) -> Result<TimelineEntry, MemlineError> {
    let kind = perception_kind(record);
    let identity = usable_identity(record.embedding_id.as_deref())
        .ok_or(MemlineError::Normalization { kind })?;
    let content = synthesize_content(kind, &record.facets, None);
    Ok(TimelineEntry {
        source_kind: kind,
        timestamp_seconds: resolve_timestamp(record.ts.as_ref(), now),
        identity,
        facets: record.facets.clone(),
        content,
        tags: collect_tags(&record.tags),
        title: None,
        summary: None,
    })
}

/// Decide the kind of a perception record.
///
/// The declared `source` wins; otherwise the facet prefixes decide
/// (`vision.*` before `speech.*`); anything else is a generic event.
pub fn perception_kind(record: &PerceptionRecord) -> SourceKind {
    match record.source.as_deref().map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("vision") => return SourceKind::Vision,
        Some(s) if s.eq_ignore_ascii_case("speech") => return SourceKind::Speech,
        _ => {}
    }
    if record.facets.keys().any(|k| k.starts_with("vision.")) {
        SourceKind::Vision
    } else if record.facets.keys().any(|k| k.starts_with("speech.")) {
        SourceKind::Speech
    } else {
        SourceKind::Event
    }
}

/// Best-effort human-readable content for an entry.
///
/// * speech – the `speech.transcript` facet verbatim
/// * vision – `"I see a {vision.object}"`
/// * stm / ltm – the stored text, falling back to the perception forms
/// * anything else – empty
pub fn synthesize_content(kind: SourceKind, facets: &Facets, stored: Option<&str>) -> String {
    let stored = stored.filter(|s| !s.is_empty()).map(str::to_string);
    let transcript = || facet_text(facets, facet::SPEECH_TRANSCRIPT);
    let sight = || facet_text(facets, facet::VISION_OBJECT).map(|o| format!("I see a {o}"));
    let content = match kind {
        SourceKind::Speech => transcript().or(stored),
        SourceKind::Vision => sight().or(stored),
        SourceKind::Stm | SourceKind::Ltm => stored.or_else(transcript).or_else(sight),
        SourceKind::Event => stored,
    };
    content.unwrap_or_default()
}

fn facet_text(facets: &Facets, name: &str) -> Option<String> {
    match facets.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn usable_identity(id: Option<&str>) -> Option<String> {
    id.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn collect_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
