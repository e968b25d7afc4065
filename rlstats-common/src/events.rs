//! Event types for the rlstats event system
//!
//! Provides shared event definitions and the EventBus used to make replay
//! state changes observable (SSE, CLI watchers, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ReplayStatus;

/// rlstats event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A replay changed status (terminal transition or reprocess reset)
    ReplayStatusChanged {
        replay_id: Uuid,
        external_id: Option<String>,
        old_status: ReplayStatus,
        new_status: ReplayStatus,
        timestamp: DateTime<Utc>,
    },

    /// A replay file was accepted by the upload flow
    ReplayUploaded {
        replay_id: Uuid,
        external_id: String,
        file_name: String,
        /// True when the file had already been submitted before
        is_duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// One scheduler scan finished
    SyncCycleCompleted {
        checked: usize,
        completed: usize,
        failed: usize,
        rate_limited: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ReplayStatusChanged { .. } => "ReplayStatusChanged",
            SyncEvent::ReplayUploaded { .. } => "ReplayUploaded",
            SyncEvent::SyncCycleCompleted { .. } => "SyncCycleCompleted",
        }
    }

    /// Replay the event is about, if any
    pub fn replay_id(&self) -> Option<Uuid> {
        match self {
            SyncEvent::ReplayStatusChanged { replay_id, .. }
            | SyncEvent::ReplayUploaded { replay_id, .. } => Some(*replay_id),
            SyncEvent::SyncCycleCompleted { .. } => None,
        }
    }

    /// Convenience constructor stamped with the current time
    pub fn status_changed(
        replay_id: Uuid,
        external_id: Option<String>,
        old_status: ReplayStatus,
        new_status: ReplayStatus,
    ) -> Self {
        SyncEvent::ReplayStatusChanged {
            replay_id,
            external_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast channel for SyncEvents
///
/// Cloning an EventBus yields another handle onto the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow receivers start lagging
    ///
    /// # Examples
    ///
    /// ```
    /// use rlstats_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!(event_type = event.event_type(), "No subscribers for event");
        }
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_status_change() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let replay_id = Uuid::new_v4();

        bus.emit_lossy(SyncEvent::status_changed(
            replay_id,
            Some("abc".to_string()),
            ReplayStatus::Processing,
            ReplayStatus::Completed,
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "ReplayStatusChanged");
        assert_eq!(event.replay_id(), Some(replay_id));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);

        let event = SyncEvent::SyncCycleCompleted {
            checked: 0,
            completed: 0,
            failed: 0,
            rate_limited: 0,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        // Lossy emit must not panic
        bus.emit_lossy(event);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SyncEvent::status_changed(
            Uuid::nil(),
            None,
            ReplayStatus::Completed,
            ReplayStatus::Reprocessing,
        );
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ReplayStatusChanged");
        assert_eq!(json["new_status"], "reprocessing");
    }
}
