//! Realtime channel: path-keyed push store with subscriptions

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub fn location_path(device: &str) -> String {
    format!("{}/Realtime", device)
}

pub fn geofence_path(device: &str) -> String {
    format!("{}/geofencing", device)
}

pub fn radius_path(device: &str) -> String {
    format!("{}/geofencing/radius", device)
}

pub fn battery_path(device: &str) -> String {
    format!("{}/battery", device)
}

pub fn main_path(device: &str) -> String {
    format!("{}/main", device)
}

/// Everything the channel holds for a device
pub fn device_root(device: &str) -> String {
    device.to_string()
}

/// Live feed of a single path.
///
/// Each item is the full value at the path after an update, `None` once the
/// path has been cleared. Dropping the subscription stops the feed.
pub struct Subscription {
    path: String,
    updates: mpsc::Receiver<Option<Value>>,
    _guard: DropGuard,
}

impl Subscription {
    pub fn new(
        path: impl Into<String>,
        updates: mpsc::Receiver<Option<Value>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            updates,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next value at the path, or `None` when the feed has ended
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.updates.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .finish()
    }
}

/// Push-capable remote store addressed by slash-separated paths
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Point read; `None` when nothing is stored at the path
    async fn read(&self, path: &str) -> crate::Result<Option<Value>>;

    async fn write(&self, path: &str, value: &Value) -> crate::Result<()>;

    async fn delete(&self, path: &str) -> crate::Result<()>;

    async fn subscribe(&self, path: &str) -> crate::Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_keyed_by_device() {
        assert_eq!(location_path("trk-1"), "trk-1/Realtime");
        assert_eq!(geofence_path("trk-1"), "trk-1/geofencing");
        assert_eq!(radius_path("trk-1"), "trk-1/geofencing/radius");
        assert_eq!(battery_path("trk-1"), "trk-1/battery");
        assert_eq!(main_path("trk-1"), "trk-1/main");
        assert_eq!(device_root("trk-1"), "trk-1");
    }

    #[tokio::test]
    async fn dropping_subscription_cancels_producer() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let producer = cancel.clone();

        let mut subscription = Subscription::new("trk-1/Realtime", rx, cancel);
        tx.send(Some(serde_json::json!({"timestamp": "x"})))
            .await
            .unwrap();
        assert!(subscription.next().await.unwrap().is_some());
        assert!(!producer.is_cancelled());

        drop(subscription);
        assert!(producer.is_cancelled());
        assert!(tx.send(None).await.is_err());
    }
}
