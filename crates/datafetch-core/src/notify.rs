//! Progress notifier: fan-out of throttled progress and terminal status events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::task_db::{TaskId, TaskStatus};

/// One progress or status update for a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    /// None when the total size is unknown (single resource without content length).
    pub progress_percent: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProgressEvent {
    /// Dashboard message: `{"type":"task_update","task_id":..,"data":{..}}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "task_update",
            "task_id": self.task_id,
            "data": self,
        })
    }
}

/// Receives events from running units. Must not block: implementations hand
/// off or drop, and a failed delivery never fails the transfer.
pub trait ProgressNotifier: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Fan-out over a tokio broadcast channel. Slow subscribers lag and lose the
/// oldest events; publishing with no subscribers is a no-op.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("progress event dropped: no subscribers");
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
    fn publish(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: TaskStatus) -> ProgressEvent {
        ProgressEvent {
            task_id: 4,
            progress_percent: Some(50.0),
            downloaded_bytes: 512,
            total_bytes: Some(1024),
            status,
            current_file: Some("a.nc".to_string()),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.publish(event(TaskStatus::Running));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.task_id, 4);
        assert_eq!(got.status, TaskStatus::Running);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(1);
        notifier.publish(event(TaskStatus::Completed));
        NoopNotifier.publish(event(TaskStatus::Failed));
    }

    #[test]
    fn json_message_shape() {
        let v = event(TaskStatus::Running).to_json();
        assert_eq!(v["type"], "task_update");
        assert_eq!(v["task_id"], 4);
        assert_eq!(v["data"]["status"], "running");
        assert_eq!(v["data"]["current_file"], "a.nc");
        assert!(v["data"].get("error_message").is_none());
    }
}
