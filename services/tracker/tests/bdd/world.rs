//! BDD test world for tracker service

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cucumber::World;
use tempfile::TempDir;
use tracker::fake::{FakePollingEndpoint, MemoryRealtimeChannel};
use tracker::model::Device;
use tracker::notifier::{Notification, Notifier};
use tracker::preference::{JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
use tracker::state::new_state_handle;
use tracker::synchronizer::RefreshOutcome;
use tracker::{Session, Synchronizer};

pub const POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// A notifier that keeps everything it is given
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub records: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn type_name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> tracker::Result<()> {
        self.records.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default, World)]
pub struct TrackerWorld {
    // Collaborators
    pub devices: Vec<String>,
    pub realtime: Arc<MemoryRealtimeChannel>,
    pub polling: Arc<FakePollingEndpoint>,
    pub notifier: Arc<RecordingNotifier>,
    pub preferences_dir: Option<TempDir>,

    // Service under test, built on first use
    pub sync: Option<Arc<Synchronizer>>,
    pub session: Option<Session>,

    // Results
    pub last_outcome: Option<RefreshOutcome>,
    pub last_error: Option<String>,
}

impl TrackerWorld {
    pub fn preferences_path(&self) -> Option<PathBuf> {
        self.preferences_dir
            .as_ref()
            .map(|dir| dir.path().join("sources.json"))
    }

    pub async fn synchronizer(&mut self) -> Arc<Synchronizer> {
        if let Some(sync) = &self.sync {
            return Arc::clone(sync);
        }

        let preferences: Arc<dyn PreferenceStore> = match self.preferences_path() {
            Some(path) => Arc::new(JsonFilePreferenceStore::open(path).unwrap()),
            None => Arc::new(MemoryPreferenceStore::new()),
        };
        let state = new_state_handle(50);
        state.write().await.set_devices(
            self.devices
                .iter()
                .map(|id| Device::new(id.clone(), None))
                .collect(),
        );
        let sync = Arc::new(
            Synchronizer::new(
                self.realtime.clone(),
                self.polling.clone(),
                preferences,
                state,
            )
            .with_notifier(self.notifier.clone()),
        );
        self.sync = Some(Arc::clone(&sync));
        sync
    }

    pub async fn session(&mut self) -> &mut Session {
        if self.session.is_none() {
            let sync = self.synchronizer().await;
            self.session = Some(Session::new(sync, POLLING_INTERVAL));
        }
        self.session.as_mut().unwrap()
    }

    /// Drop the running service; collaborators and the preference file survive
    pub async fn restart(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown().await;
        }
        self.sync = None;
    }

    pub fn last_notification(&self) -> Option<Notification> {
        self.notifier.records.lock().unwrap().last().cloned()
    }
}

/// Give spawned refresh loops a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
