//! `memline-engine` – The Unified Memory Timeline Engine.
//!
//! Turns three structurally different memory sources and a live delta stream
//! into one ordered, filterable, playable timeline with a single
//! authoritative selection.
//!
//! # Modules
//!
//! - [`clock`] – [`resolve_timestamp`][clock::resolve_timestamp]: coerces
//!   seconds, milliseconds, RFC 3339 text and garbage into epoch seconds.
//! - [`normalize`] – [`normalize`][normalize::normalize]: maps every
//!   [`RawRecord`][memline_types::RawRecord] variant onto one
//!   [`TimelineEntry`][memline_types::TimelineEntry].
//! - [`aggregate`] – [`aggregate`][aggregate::aggregate]: stable
//!   chronological merge of the three sources.
//! - [`live`] – [`LiveBuffer`][live::LiveBuffer]: parses push-stream deltas
//!   and keeps a bounded, de-duplicated, ordered event buffer.
//! - [`resolver`] – [`resolve`][resolver::resolve]: source filter, free-text
//!   search and cluster/group membership composed by AND.
//! - [`playback`] – [`PlaybackClock`][playback::PlaybackClock]: the virtual
//!   cursor that maps elapsed time to one entry per 10-second slot.
//! - [`selection`] – [`SelectionCell`][selection::SelectionCell]: the single
//!   selected-entry slot, arbitrated between user, playback and stream
//!   writers and observed through a `watch` channel.

pub mod aggregate;
pub mod clock;
pub mod live;
pub mod normalize;
pub mod playback;
pub mod resolver;
pub mod selection;

pub use aggregate::{aggregate, aggregate_results};
pub use clock::{now_seconds, resolve_timestamp};
pub use live::{ApplyOutcome, DEFAULT_RETENTION, Delta, LiveBuffer, parse_delta};
pub use normalize::{normalize, normalize_all};
pub use playback::{PlaybackClock, PlaybackState, TickOutcome, SECONDS_PER_SLOT};
pub use resolver::{resolve, Criteria, Member, MemberSet, Selector, SourceFilter};
pub use selection::{Selection, SelectionCell, SelectionOutcome, SelectionSource, SelectionUpdate};
