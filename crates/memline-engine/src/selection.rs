//! [`SelectionCell`] – the single authoritative "selected entry" slot.
//!
//! Three writers compete for the slot: a direct user pick, the playback clock
//! and live-stream auto-select. They all go through [`SelectionCell::apply`]
//! with a tagged [`SelectionUpdate`]; readers hold a
//! [`tokio::sync::watch::Receiver`] and only ever see whole snapshots.
//!
//! # Arbitration
//!
//! Every applied write bumps a generation counter. Non-user writers stamp
//! their update with the generation they observed when they computed it.
//!
//! | Update | Condition | Outcome |
//! |---|---|---|
//! | user | always | applied |
//! | playback / stream | observed before the latest user pick | superseded |
//! | playback / stream | same key as the current entry | unchanged, no broadcast |
//! | playback / stream | otherwise | applied (last write wins) |
//!
//! A user click that lands between two playback ticks therefore cannot be
//! overwritten by a tick whose value was computed before the click.

use memline_types::{EntryKey, TimelineEntry};
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

/// Who wrote a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionSource {
    User,
    Playback,
    Stream,
}

/// Snapshot published to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    pub entry: Option<TimelineEntry>,
    /// Writer of the current value; `None` before the first write.
    pub source: Option<SelectionSource>,
    pub generation: u64,
}

impl Selection {
    pub fn key(&self) -> Option<EntryKey> {
        self.entry.as_ref().map(TimelineEntry::key)
    }
}

/// A proposed write.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionUpdate {
    pub source: SelectionSource,
    pub entry: Option<TimelineEntry>,
    /// Cell generation the writer saw when it computed `entry`.
    /// Ignored for user updates.
    pub observed_generation: u64,
}

impl SelectionUpdate {
    pub fn user(entry: Option<TimelineEntry>) -> Self {
        Self {
            source: SelectionSource::User,
            entry,
            observed_generation: u64::MAX,
        }
    }

    pub fn playback(entry: TimelineEntry, observed_generation: u64) -> Self {
        Self {
            source: SelectionSource::Playback,
            entry: Some(entry),
            observed_generation,
        }
    }

    pub fn stream(entry: TimelineEntry, observed_generation: u64) -> Self {
        Self {
            source: SelectionSource::Stream,
            entry: Some(entry),
            observed_generation,
        }
    }
}

/// Result of [`SelectionCell::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Written and broadcast; carries the new generation.
    Applied(u64),
    /// Same key as the current value; nothing broadcast.
    Unchanged,
    /// Computed before a newer user pick; dropped.
    Superseded,
}

pub struct SelectionCell {
    tx: watch::Sender<Selection>,
    generation: u64,
    last_user_generation: u64,
}

impl Default for SelectionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Selection::default());
        Self {
            tx,
            generation: 0,
            last_user_generation: 0,
        }
    }

    /// Subscribe to selection snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Selection> {
        self.tx.subscribe()
    }

    /// Clone of the current snapshot.
    pub fn current(&self) -> Selection {
        self.tx.borrow().clone()
    }

    pub fn selected_entry(&self) -> Option<TimelineEntry> {
        self.tx.borrow().entry.clone()
    }

    pub fn selected_key(&self) -> Option<EntryKey> {
        self.tx.borrow().key()
    }

    /// Generation of the current value. Non-user writers capture this when
    /// they start computing an update.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The single setter.
    pub fn apply(&mut self, update: SelectionUpdate) -> SelectionOutcome {
        if update.source != SelectionSource::User {
            if update.observed_generation < self.last_user_generation {
                trace!(source = ?update.source, "selection superseded by user pick");
                return SelectionOutcome::Superseded;
            }
            let unchanged = {
                let current = self.tx.borrow();
                match (&current.entry, &update.entry) {
                    (Some(a), Some(b)) => a.key() == b.key(),
                    (None, None) => true,
                    _ => false,
                }
            };
            if unchanged {
                return SelectionOutcome::Unchanged;
            }
        }

        self.generation += 1;
        if update.source == SelectionSource::User {
            self.last_user_generation = self.generation;
        }
        self.tx.send_replace(Selection {
            entry: update.entry,
            source: Some(update.source),
            generation: self.generation,
        });
        SelectionOutcome::Applied(self.generation)
    }

    /// Drop the selection if it refers to `key`. Used when an entry leaves
    /// the live buffer.
    pub fn clear_if(&mut self, key: &EntryKey) -> bool {
        if self.selected_key().as_ref() != Some(key) {
            return false;
        }
        self.generation += 1;
        self.tx.send_replace(Selection {
            entry: None,
            source: None,
            generation: self.generation,
        });
        true
    }
}
