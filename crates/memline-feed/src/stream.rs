//! Long-lived push-stream task.
//!
//! [`run_stream`] holds the `/events` connection open for the lifetime of a
//! session. Frames are forwarded verbatim over an mpsc channel so that the
//! session applies them one at a time. On any transport drop the task
//! reports [`StreamState::Disconnected`], waits `reconnect_delay` and dials
//! again; delta idempotence on the receiving side makes redelivery harmless.
//!
//! The task ends only when the receiving half of the channel is dropped, or
//! when its `JoinHandle` is aborted.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sse::SseDecoder;
use crate::status::StreamState;

/// Message from the push-stream task to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// One complete SSE payload (a JSON delta, not yet parsed).
    Frame(String),
    /// Connection lifecycle change.
    State(StreamState),
}

/// Outcome of one connection attempt.
enum Session {
    /// The receiver is gone; stop for good.
    Closed,
    /// The transport dropped; reconnect after the delay.
    Dropped,
}

/// Keep the push stream at `url` open, forwarding frames to `tx`.
pub async fn run_stream(url: String, reconnect_delay: Duration, tx: mpsc::Sender<StreamMessage>) {
    // No overall request timeout: the response body never ends on purpose.
    let http = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
    {
        Ok(http) => http,
        Err(e) => {
            warn!(error = %e, "cannot build stream client");
            let _ = tx.send(StreamMessage::State(StreamState::Disconnected)).await;
            return;
        }
    };

    let mut decoder = SseDecoder::new();
    loop {
        if tx
            .send(StreamMessage::State(StreamState::Connecting))
            .await
            .is_err()
        {
            return;
        }
        decoder.reset();
        match connect_once(&http, &url, &mut decoder, &tx).await {
            Session::Closed => return,
            Session::Dropped => {}
        }
        if tx
            .send(StreamMessage::State(StreamState::Disconnected))
            .await
            .is_err()
        {
            return;
        }
        debug!(delay_ms = reconnect_delay.as_millis() as u64, "reconnecting push stream");
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn connect_once(
    http: &reqwest::Client,
    url: &str,
    decoder: &mut SseDecoder,
    tx: &mpsc::Sender<StreamMessage>,
) -> Session {
    let response = match http
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, error = %e, "push stream connect failed");
            return Session::Dropped;
        }
    };
    if !response.status().is_success() {
        warn!(%url, status = response.status().as_u16(), "push stream refused");
        return Session::Dropped;
    }

    info!(%url, "push stream connected");
    if tx
        .send(StreamMessage::State(StreamState::Connected))
        .await
        .is_err()
    {
        return Session::Closed;
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "push stream read error");
                return Session::Dropped;
            }
        };
        for payload in decoder.push(&bytes) {
            if tx.send(StreamMessage::Frame(payload)).await.is_err() {
                return Session::Closed;
            }
        }
    }
    warn!(%url, "push stream closed by server");
    Session::Dropped
}
