//! `memline-runtime` – running timeline sessions.
//!
//! # Modules
//!
//! - [`session`] – [`TimelineSession`][session::TimelineSession]: the
//!   synchronous composition of the engine for one viewer (bulk sources,
//!   live buffer, view, criteria, playback clock and selection cell).
//! - [`driver`] – [`SessionDriver`][driver::SessionDriver]: runs a session
//!   as a Tokio actor fed by the gateway client, the push stream and the
//!   playback timer, and hands out a [`SessionHandle`][driver::SessionHandle].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod driver;
pub mod session;
pub mod telemetry;

pub use driver::{SessionCommand, SessionDriver, SessionHandle};
pub use session::{SessionConfig, SessionSnapshot, TimelineSession, View};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
