//! [`PlaybackClock`] – virtual time cursor over the visible sequence.
//!
//! Playback time is virtual: every entry owns one fixed
//! [`SECONDS_PER_SLOT`]-wide slot, so the cursor maps to an index with a
//! plain division rather than to wall-clock timestamps.
//!
//! # State machine
//!
//! | From | Event | To | Cursor |
//! |---|---|---|---|
//! | stopped | `play` | playing | kept |
//! | playing | `pause` | stopped | kept |
//! | any | `reset` | stopped | `0` |
//! | any | `seek(x)` | unchanged | `x` |
//! | playing | `tick` reaches the bound | stopped | `bound` |
//!
//! The clock does not own a timer. Whoever drives it calls
//! [`PlaybackClock::tick`] once per [`PlaybackClock::tick_period`] while
//! [`PlaybackClock::is_playing`] is true.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use memline_engine::playback::{PlaybackClock, TickOutcome};
//!
//! let mut clock = PlaybackClock::new(Duration::from_secs(1));
//! clock.play();
//!
//! // One entry = one 10 s slot = ten one-second ticks.
//! for _ in 0..9 {
//!     assert_eq!(clock.tick(1), TickOutcome::Advanced);
//! }
//! assert_eq!(clock.tick(1), TickOutcome::ReachedEnd);
//! assert!(!clock.is_playing());
//! assert_eq!(clock.state().cursor_seconds, 10.0);
//! ```

use std::time::Duration;

use memline_types::{EntryKey, TimelineEntry};
use serde::Serialize;

/// Width of one entry's slot in virtual playback seconds.
pub const SECONDS_PER_SLOT: f64 = 10.0;

/// Observable playback state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    pub cursor_seconds: f64,
    pub is_playing: bool,
    pub speed_multiplier: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            cursor_seconds: 0.0,
            is_playing: false,
            speed_multiplier: 1.0,
        }
    }
}

/// Result of one [`PlaybackClock::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clock is stopped; nothing moved.
    Idle,
    /// Cursor moved forward and is still inside the bound.
    Advanced,
    /// Cursor hit the bound; the clock paused itself.
    ReachedEnd,
}

// ─────────────────────────────────────────────────────────────────────────────
// PlaybackClock
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: PlaybackState,
    tick_period: Duration,
    /// Index last handed out by [`Self::next_selection`].
    last_index: Option<usize>,
    /// Key of the entry last handed out by [`Self::next_selection`].
    last_key: Option<EntryKey>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl PlaybackClock {
    /// Create a stopped clock at cursor 0 and speed 1.
    ///
    /// A zero `tick_period` is raised to one millisecond.
    pub fn new(tick_period: Duration) -> Self {
        Self {
            state: PlaybackState::default(),
            tick_period: tick_period.max(Duration::from_millis(1)),
            last_index: None,
            last_key: None,
        }
    }

    /// Builder variant of [`Self::set_speed`]; invalid values are ignored.
    pub fn with_speed(mut self, speed: f64) -> Self {
        let _ = self.set_speed(speed);
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn play(&mut self) {
        self.state.is_playing = true;
    }

    pub fn pause(&mut self) {
        self.state.is_playing = false;
    }

    pub fn reset(&mut self) {
        self.state.is_playing = false;
        self.state.cursor_seconds = 0.0;
        self.forget_index();
    }

    /// Move the cursor directly. Negative and non-finite positions clamp to 0.
    pub fn seek(&mut self, seconds: f64) {
        self.state.cursor_seconds = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
    }

    /// Change the speed multiplier. Returns `false` (and keeps the old
    /// speed) unless `speed` is finite and strictly positive.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if !speed.is_finite() || speed <= 0.0 {
            return false;
        }
        self.state.speed_multiplier = speed;
        true
    }

    /// Maximum cursor value for a sequence of `entry_count` entries.
    pub fn bound(entry_count: usize) -> f64 {
        entry_count as f64 * SECONDS_PER_SLOT
    }

    /// Advance by one tick period.
    ///
    /// The cursor never passes the bound; reaching it pauses the clock.
    pub fn tick(&mut self, entry_count: usize) -> TickOutcome {
        if !self.state.is_playing {
            return TickOutcome::Idle;
        }
        let step = self.state.speed_multiplier * self.tick_period.as_secs_f64();
        let bound = Self::bound(entry_count);
        let next = self.state.cursor_seconds + step;
        if next >= bound {
            self.state.cursor_seconds = bound;
            self.state.is_playing = false;
            TickOutcome::ReachedEnd
        } else {
            self.state.cursor_seconds = next;
            TickOutcome::Advanced
        }
    }

    /// Slot index under the cursor, or `None` for an empty sequence.
    pub fn current_index(&self, entry_count: usize) -> Option<usize> {
        if entry_count == 0 {
            return None;
        }
        let slot = (self.state.cursor_seconds / SECONDS_PER_SLOT).floor();
        // `as usize` saturates, so huge cursors land on the last slot.
        Some((slot as usize).min(entry_count - 1))
    }

    /// The entry to broadcast after a tick or seek, if any.
    ///
    /// Yields an entry only when the slot index changed since the previous
    /// call *and* the entry under it has a different key from the one last
    /// yielded.
    pub fn next_selection<'a>(
        &mut self,
        entries: &'a [TimelineEntry],
    ) -> Option<&'a TimelineEntry> {
        let Some(index) = self.current_index(entries.len()) else {
            self.last_index = None;
            return None;
        };
        if self.last_index == Some(index) {
            return None;
        }
        self.last_index = Some(index);
        let entry = &entries[index];
        if self.last_key.as_ref().is_some_and(|k| entry.has_key(k)) {
            return None;
        }
        self.last_key = Some(entry.key());
        Some(entry)
    }

    /// Forget the last slot index so the next tick or seek re-evaluates it.
    /// Used when the visible sequence changes shape.
    pub fn forget_index(&mut self) {
        self.last_index = None;
    }

    /// Align the cursor with a user pick at `index`, so playback resumes from
    /// the picked entry without re-broadcasting it.
    pub fn sync_to(&mut self, index: usize, key: EntryKey) {
        self.state.cursor_seconds = index as f64 * SECONDS_PER_SLOT;
        self.last_index = Some(index);
        self.last_key = Some(key);
    }
}
