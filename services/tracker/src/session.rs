//! Tracking session: refresh scheduling and live subscriptions for the selected device

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::model::{Device, SourcePreference};
use crate::realtime::{self, Subscription};
use crate::registration::Registration;
use crate::synchronizer::Synchronizer;

/// Running refresh loop for one device.
///
/// Stopping the handle, or dropping it, ends the timer and closes the
/// device's subscriptions. No update reaches the view state afterwards.
#[derive(Debug)]
pub struct RefreshHandle {
    device: String,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Re-check the source preference without waiting for the next tick
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Cancel the loop and wait for it to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Refresh loop for '{}' ended abnormally: {}", self.device, e);
            }
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Refresh `device` now and every `interval` until the handle is released.
///
/// While the device prefers the realtime channel, its location and geofence
/// paths are subscribed and pushes are applied as they arrive.
pub fn schedule_refresh(
    sync: Arc<Synchronizer>,
    device: impl Into<String>,
    interval: Duration,
) -> RefreshHandle {
    let device = device.into();
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());

    tracing::debug!("Scheduling refresh of '{}' every {:?}", device, interval);
    let task = tokio::spawn(refresh_loop(
        sync,
        device.clone(),
        interval,
        cancel.clone(),
        Arc::clone(&wake),
    ));

    RefreshHandle {
        device,
        cancel,
        wake,
        task: Some(task),
    }
}

struct LiveFeeds {
    location: Subscription,
    geofence: Subscription,
}

enum Push {
    Location(Option<Option<Value>>),
    Geofence(Option<Option<Value>>),
}

async fn open_feeds(sync: &Synchronizer, device: &str) -> Option<LiveFeeds> {
    let channel = sync.realtime();
    let location = channel.subscribe(&realtime::location_path(device)).await;
    let geofence = channel.subscribe(&realtime::geofence_path(device)).await;
    match (location, geofence) {
        (Ok(location), Ok(geofence)) => {
            tracing::debug!("Live updates opened for '{}'", device);
            Some(LiveFeeds { location, geofence })
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Failed to subscribe to '{}': {}", device, e);
            None
        }
    }
}

async fn next_push(feeds: &mut Option<LiveFeeds>) -> Push {
    match feeds {
        Some(feeds) => tokio::select! {
            update = feeds.location.next() => Push::Location(update),
            update = feeds.geofence.next() => Push::Geofence(update),
        },
        None => std::future::pending().await,
    }
}

async fn refresh_loop(
    sync: Arc<Synchronizer>,
    device: String,
    interval: Duration,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feeds: Option<LiveFeeds> = None;
    // Set when a feed broke; reopening waits for the next tick
    let mut feeds_broken = false;

    loop {
        let wants_live = sync.preference(&device) == Some(SourcePreference::Realtime);
        if wants_live && feeds.is_none() && !feeds_broken {
            feeds = open_feeds(&sync, &device).await;
            feeds_broken = feeds.is_none();
        } else if !wants_live && feeds.is_some() {
            tracing::debug!("Live updates closed for '{}'", device);
            feeds = None;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                feeds_broken = false;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sync.refresh_device(&device) => {}
                }
            }
            _ = wake.notified() => {
                tracing::debug!("Refresh loop for '{}' woken", device);
            }
            push = next_push(&mut feeds) => match push {
                Push::Location(Some(value)) => {
                    sync.apply_location_push(&device, value).await;
                }
                Push::Geofence(Some(value)) => {
                    sync.apply_geofence_push(&device, value).await;
                }
                Push::Location(None) | Push::Geofence(None) => {
                    tracing::debug!("Live updates for '{}' ended", device);
                    feeds = None;
                    feeds_broken = true;
                }
            },
        }
    }

    tracing::debug!("Refresh loop for '{}' stopped", device);
}

/// The user's view: which device is selected, and the refresh loop that follows it
#[derive(Debug)]
pub struct Session {
    sync: Arc<Synchronizer>,
    interval: Duration,
    active: Option<RefreshHandle>,
}

impl Session {
    pub fn new(sync: Arc<Synchronizer>, interval: Duration) -> Self {
        Self {
            sync,
            interval,
            active: None,
        }
    }

    pub fn sync(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    /// Device whose refresh loop is running
    pub fn active_device(&self) -> Option<&str> {
        self.active.as_ref().map(RefreshHandle::device)
    }

    /// Load the device list and start following the first device
    pub async fn load(&mut self) -> crate::Result<Vec<Device>> {
        let result = self.sync.load_devices().await;
        self.sync_selection().await;
        result
    }

    pub async fn select(&mut self, device: &str) -> crate::Result<()> {
        if !self.sync.state().write().await.select(device) {
            return Err(crate::TrackerError::NotFound(format!(
                "Unknown device '{}'",
                device
            )));
        }
        self.sync_selection().await;
        Ok(())
    }

    pub async fn select_index(&mut self, index: usize) -> crate::Result<()> {
        if !self.sync.state().write().await.select_index(index) {
            return Err(crate::TrackerError::NotFound(format!(
                "No device at position {}",
                index
            )));
        }
        self.sync_selection().await;
        Ok(())
    }

    pub async fn select_next(&mut self) -> Option<String> {
        let selected = self
            .sync
            .state()
            .write()
            .await
            .select_next()
            .map(str::to_string);
        self.sync_selection().await;
        selected
    }

    pub async fn select_previous(&mut self) -> Option<String> {
        let selected = self
            .sync
            .state()
            .write()
            .await
            .select_previous()
            .map(str::to_string);
        self.sync_selection().await;
        selected
    }

    pub async fn deselect(&mut self) {
        self.sync.state().write().await.clear_selection();
        self.sync_selection().await;
    }

    pub async fn toggle_source(&mut self, device: &str) -> crate::Result<SourcePreference> {
        let source = self.sync.toggle_source(device).await?;
        if let Some(handle) = self.active.as_ref().filter(|h| h.device() == device) {
            handle.wake();
        }
        Ok(source)
    }

    pub async fn delete_device(&mut self, device: &str) -> crate::Result<()> {
        if self.active_device() == Some(device) {
            self.stop_active().await;
        }
        let result = self.sync.delete_device(device).await;
        self.sync_selection().await;
        result
    }

    pub async fn register(&mut self, registration: Registration) -> crate::Result<Vec<Device>> {
        let result = self.sync.register_device(registration).await;
        self.sync_selection().await;
        result
    }

    /// Make the refresh loop follow the view state's selection
    pub async fn sync_selection(&mut self) {
        let selected = self
            .sync
            .state()
            .read()
            .await
            .selected_id()
            .map(str::to_string);
        let still_running = self.active.as_ref().is_some_and(RefreshHandle::is_running);
        if selected.as_deref() == self.active_device() && still_running {
            return;
        }

        self.stop_active().await;
        if let Some(device) = selected {
            tracing::info!("Following '{}'", device);
            self.active = Some(schedule_refresh(
                Arc::clone(&self.sync),
                device,
                self.interval,
            ));
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_active().await;
    }

    async fn stop_active(&mut self) {
        if let Some(handle) = self.active.take() {
            tracing::debug!("Stopping refresh of '{}'", handle.device());
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakePollingEndpoint, MemoryRealtimeChannel};
    use crate::preference::{MemoryPreferenceStore, PreferenceStore};
    use crate::state::new_state_handle;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_secs(30);

    struct Fixture {
        realtime: Arc<MemoryRealtimeChannel>,
        polling: Arc<FakePollingEndpoint>,
        preferences: Arc<MemoryPreferenceStore>,
        sync: Arc<Synchronizer>,
    }

    async fn fixture(devices: &[&str]) -> Fixture {
        let realtime = Arc::new(MemoryRealtimeChannel::new());
        let polling = Arc::new(FakePollingEndpoint::new());
        let preferences = Arc::new(MemoryPreferenceStore::new());
        let state = new_state_handle(20);
        state
            .write()
            .await
            .set_devices(devices.iter().map(|id| Device::new(*id, None)).collect());
        let sync = Arc::new(Synchronizer::new(
            realtime.clone(),
            polling.clone(),
            preferences.clone(),
            state,
        ));
        Fixture {
            realtime,
            polling,
            preferences,
            sync,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_immediately_and_on_interval() {
        let f = fixture(&["trk-1"]).await;
        let handle = schedule_refresh(Arc::clone(&f.sync), "trk-1", INTERVAL);

        settle().await;
        assert_eq!(f.polling.call_count("location trk-1"), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(f.polling.call_count("location trk-1"), 2);

        handle.stop().await;
        tokio::time::sleep(INTERVAL * 4).await;
        assert_eq!(f.polling.call_count("location trk-1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_timer() {
        let f = fixture(&["trk-1"]).await;
        let handle = schedule_refresh(Arc::clone(&f.sync), "trk-1", INTERVAL);
        settle().await;
        assert!(handle.is_running());

        drop(handle);
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(f.polling.call_count("location trk-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_preference_opens_live_feeds() {
        let f = fixture(&["trk-1"]).await;
        f.realtime.set(
            "trk-1/Realtime",
            json!({"timestamp": "2025-03-13,14:30:00,12.97,77.59"}),
        );

        let handle = schedule_refresh(Arc::clone(&f.sync), "trk-1", INTERVAL);
        settle().await;
        assert_eq!(f.realtime.active_subscriptions(), 2);

        f.realtime.set(
            "trk-1/Realtime",
            json!({"timestamp": "2025-03-13,14:35:00,13.01,77.61"}),
        );
        f.realtime
            .set("trk-1/geofencing", json!({"lat": 13.0, "lng": 77.6, "radius": 2}));
        settle().await;

        let entry = f.sync.entry("trk-1").await.unwrap();
        assert_eq!(entry.location.sample().unwrap().lat, 13.01);
        assert_eq!(entry.geofence.geofence().unwrap().radius, 2.0);
        // Pushes arrived well before the second tick
        assert_eq!(f.realtime.reads("trk-1/Realtime"), 1);

        handle.stop().await;
        assert_eq!(f.realtime.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_after_stop_is_not_applied() {
        let f = fixture(&["trk-1"]).await;
        f.preferences
            .set("trk-1", SourcePreference::Realtime)
            .unwrap();

        let handle = schedule_refresh(Arc::clone(&f.sync), "trk-1", INTERVAL);
        settle().await;
        handle.stop().await;

        f.realtime.set(
            "trk-1/Realtime",
            json!({"timestamp": "2025-03-13,14:30:00,12.97,77.59"}),
        );
        settle().await;
        assert!(!f.sync.entry("trk-1").await.unwrap().location.found());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_preference_keeps_feeds_closed() {
        let f = fixture(&["trk-1"]).await;
        f.polling.set_location(
            "trk-1",
            json!({
                "date": "2025-03-13",
                "time": "14:30:00",
                "latitude": 12.97,
                "longitude": 77.59,
            }),
        );

        let _handle = schedule_refresh(Arc::clone(&f.sync), "trk-1", INTERVAL);
        settle().await;
        assert_eq!(f.sync.preference("trk-1"), Some(SourcePreference::Polling));
        assert_eq!(f.realtime.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_follows_selection() {
        let f = fixture(&["trk-1", "trk-2"]).await;
        let mut session = Session::new(Arc::clone(&f.sync), INTERVAL);

        session.sync_selection().await;
        assert_eq!(session.active_device(), Some("trk-1"));

        assert_eq!(session.select_next().await.as_deref(), Some("trk-2"));
        assert_eq!(session.active_device(), Some("trk-2"));
        settle().await;
        assert_eq!(f.polling.call_count("location trk-2"), 1);

        assert!(session.select("zzz").await.is_err());
        assert_eq!(session.active_device(), Some("trk-2"));

        session.deselect().await;
        assert_eq!(session.active_device(), None);
        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(f.polling.call_count("location trk-2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn previous_wraps_and_index_jumps() {
        let f = fixture(&["trk-1", "trk-2", "trk-3"]).await;
        let mut session = Session::new(Arc::clone(&f.sync), INTERVAL);
        session.sync_selection().await;
        assert_eq!(session.active_device(), Some("trk-1"));

        assert_eq!(session.select_previous().await.as_deref(), Some("trk-3"));
        assert_eq!(session.active_device(), Some("trk-3"));

        session.select_index(1).await.unwrap();
        assert_eq!(session.active_device(), Some("trk-2"));

        let err = session.select_index(3).await.unwrap_err();
        assert!(matches!(err, crate::TrackerError::NotFound(_)));
        assert_eq!(session.active_device(), Some("trk-2"));

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_closes_feeds_without_waiting_for_tick() {
        let f = fixture(&["trk-1"]).await;
        f.realtime.set(
            "trk-1/Realtime",
            json!({"timestamp": "2025-03-13,14:30:00,12.97,77.59"}),
        );
        let mut session = Session::new(Arc::clone(&f.sync), INTERVAL);
        session.sync_selection().await;
        settle().await;
        assert_eq!(f.realtime.active_subscriptions(), 2);

        let source = session.toggle_source("trk-1").await.unwrap();
        assert_eq!(source, SourcePreference::Polling);
        settle().await;
        assert_eq!(f.realtime.active_subscriptions(), 0);

        session.shutdown().await;
        assert_eq!(session.active_device(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_active_device_moves_to_neighbour() {
        let f = fixture(&["trk-1", "trk-2"]).await;
        let mut session = Session::new(Arc::clone(&f.sync), INTERVAL);
        session.sync_selection().await;

        session.delete_device("trk-1").await.unwrap();
        assert_eq!(session.active_device(), Some("trk-2"));
        assert!(f.sync.entry("trk-1").await.is_none());
    }
}
