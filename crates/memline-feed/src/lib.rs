//! `memline-feed` – gateway I/O for the memory timeline.
//!
//! The engine never speaks HTTP itself. This crate fetches the three bulk
//! sources and keeps the push stream open, handing raw records and raw
//! frames to the session.
//!
//! # Overview
//!
//! - [`RecordSource`] – the trait a bulk-record provider implements.
//! - [`GatewayClient`] – the HTTP implementation against the gateway.
//! - [`SseDecoder`] – incremental server-sent-events frame decoder.
//! - [`run_stream`] – long-lived push-stream task that reconnects on drop.
//! - [`StatusBoard`] – per-service connectivity indicator.

pub mod client;
pub mod sse;
pub mod status;
pub mod stream;

pub use client::{FeedError, GatewayClient, RecordSource, extract_records};
pub use sse::SseDecoder;
pub use status::{StatusBoard, StreamState};
pub use stream::{StreamMessage, run_stream};
