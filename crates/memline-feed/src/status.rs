//! Connectivity status board.
//!
//! The only user-visible failure surface: whether each upstream service last
//! reported itself online, and whether the push stream itself is up.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of the push-stream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub online: bool,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusBoard {
    stream: StreamState,
    services: BTreeMap<String, ServiceHealth>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self) -> StreamState {
        self.stream
    }

    /// Returns `true` when the state actually changed.
    pub fn set_stream(&mut self, state: StreamState) -> bool {
        let changed = self.stream != state;
        self.stream = state;
        changed
    }

    /// Record a `service.status` report. Returns `true` when the service's
    /// state changed (or it was seen for the first time).
    pub fn set_service(&mut self, service: &str, online: bool) -> bool {
        match self.services.get_mut(service) {
            Some(health) if health.online == online => false,
            Some(health) => {
                health.online = online;
                health.changed_at = Utc::now();
                true
            }
            None => {
                self.services.insert(
                    service.to_string(),
                    ServiceHealth {
                        online,
                        changed_at: Utc::now(),
                    },
                );
                true
            }
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceHealth)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of services currently reported offline.
    pub fn offline(&self) -> Vec<&str> {
        self.services()
            .filter(|(_, h)| !h.online)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_connecting_with_no_services() {
        let board = StatusBoard::new();
        assert_eq!(board.stream(), StreamState::Connecting);
        assert_eq!(board.services().count(), 0);
    }

    #[test]
    fn service_changes_are_reported_once() {
        let mut board = StatusBoard::new();
        assert!(board.set_service("ego", true));
        assert!(!board.set_service("ego", true));
        assert!(board.set_service("ego", false));
        assert_eq!(board.offline(), vec!["ego"]);
        assert!(!board.service("ego").unwrap().online);
    }

    #[test]
    fn stream_state_transitions() {
        let mut board = StatusBoard::new();
        assert!(board.set_stream(StreamState::Connected));
        assert!(!board.set_stream(StreamState::Connected));
        assert!(board.set_stream(StreamState::Disconnected));
        assert_eq!(board.stream().to_string(), "disconnected");
    }
}
