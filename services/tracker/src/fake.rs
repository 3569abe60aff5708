//! In-memory collaborators
//!
//! Behave like the Firebase channel and the backend API closely enough to
//! drive the synchronizer and the session without a network. Used by unit
//! and BDD tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::PollingEndpoint;
use crate::firebase::apply_event;
use crate::model::Device;
use crate::realtime::{RealtimeChannel, Subscription};
use crate::registration::Registration;

const SUBSCRIPTION_BUFFER: usize = 16;

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether a change at one path is visible at the other
fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (segments(a), segments(b));
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |value, segment| value.get(segment))
        .filter(|value| !value.is_null())
}

fn remove_at(root: &mut Value, path: &str) {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Null;
        return;
    };
    let mut current = root;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(child) => current = child,
            None => return,
        }
    }
    if let Value::Object(children) = current {
        children.remove(*last);
    }
}

#[derive(Debug)]
struct Subscriber {
    path: String,
    tx: mpsc::Sender<Option<Value>>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct MemoryTree {
    root: Value,
    subscribers: Vec<Subscriber>,
    reads: HashMap<String, usize>,
    fail_reads: bool,
    fail_deletes: bool,
}

impl MemoryTree {
    fn publish(&mut self, changed: &str) {
        self.subscribers.retain(Subscriber::is_live);
        for subscriber in &self.subscribers {
            if overlaps(&subscriber.path, changed) {
                let value = value_at(&self.root, &subscriber.path).cloned();
                if subscriber.tx.try_send(value).is_err() {
                    tracing::debug!("Dropped update for {}", subscriber.path);
                }
            }
        }
    }
}

/// Realtime channel over an in-memory JSON tree
#[derive(Debug, Default)]
pub struct MemoryRealtimeChannel {
    tree: Mutex<MemoryTree>,
}

impl MemoryRealtimeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value as if a device had pushed it, notifying subscribers
    pub fn set(&self, path: &str, value: Value) {
        let mut tree = self.lock();
        apply_event(&mut tree.root, path, value, false);
        tree.publish(path);
    }

    /// Remove a value, notifying subscribers
    pub fn clear(&self, path: &str) {
        let mut tree = self.lock();
        remove_at(&mut tree.root, path);
        tree.publish(path);
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        value_at(&self.lock().root, path).cloned()
    }

    /// Number of point reads issued for a path
    pub fn reads(&self, path: &str) -> usize {
        self.lock().reads.get(path).copied().unwrap_or(0)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Subscriptions that have not been dropped
    pub fn active_subscriptions(&self) -> usize {
        let mut tree = self.lock();
        tree.subscribers.retain(Subscriber::is_live);
        tree.subscribers.len()
    }
}

#[async_trait]
impl RealtimeChannel for MemoryRealtimeChannel {
    async fn read(&self, path: &str) -> crate::Result<Option<Value>> {
        let mut tree = self.lock();
        *tree.reads.entry(path.to_string()).or_insert(0) += 1;
        if tree.fail_reads {
            return Err(crate::TrackerError::Realtime(format!(
                "read {} failed: channel unavailable",
                path
            )));
        }
        Ok(value_at(&tree.root, path).cloned())
    }

    async fn write(&self, path: &str, value: &Value) -> crate::Result<()> {
        self.set(path, value.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> crate::Result<()> {
        if self.lock().fail_deletes {
            return Err(crate::TrackerError::Realtime(format!(
                "delete {} failed: permission denied",
                path
            )));
        }
        self.clear(path);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> crate::Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();

        let mut tree = self.lock();
        // The first event carries the current value, like a streaming `put` at `/`
        let current = value_at(&tree.root, path).cloned();
        if tx.try_send(current).is_err() {
            tracing::debug!("Dropped initial value for {}", path);
        }
        tree.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
            cancel: cancel.clone(),
        });

        Ok(Subscription::new(path, rx, cancel))
    }
}

#[derive(Debug, Default)]
struct Backend {
    locations: HashMap<String, Value>,
    geofences: HashMap<String, Value>,
    devices: Vec<Device>,
    registrations: Vec<Registration>,
    calls: Vec<String>,
    failing: bool,
}

impl Backend {
    fn call(&mut self, call: String) -> crate::Result<()> {
        self.calls.push(call.clone());
        if self.failing {
            Err(crate::TrackerError::Api(format!(
                "{} returned status 503: unavailable",
                call
            )))
        } else {
            Ok(())
        }
    }
}

/// Backend API over in-memory maps, with a log of every call
#[derive(Debug, Default)]
pub struct FakePollingEndpoint {
    backend: Mutex<Backend>,
}

impl FakePollingEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_location(&self, device: &str, record: Value) {
        self.lock().locations.insert(device.to_string(), record);
    }

    pub fn set_geofence(&self, device: &str, record: Value) {
        self.lock().geofences.insert(device.to_string(), record);
    }

    pub fn geofence_record(&self, device: &str) -> Option<Value> {
        self.lock().geofences.get(device).cloned()
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        self.lock().devices = devices;
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock().devices.clone()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.lock().registrations.clone()
    }

    /// Every call made so far, e.g. `"location trk-1"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose log entry starts with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Make every subsequent call fail
    pub fn fail_all(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

#[async_trait]
impl PollingEndpoint for FakePollingEndpoint {
    async fn location(&self, device: &str) -> crate::Result<Option<Value>> {
        let mut backend = self.lock();
        backend.call(format!("location {}", device))?;
        Ok(backend.locations.get(device).cloned())
    }

    async fn geofence(&self, device: &str) -> crate::Result<Option<Value>> {
        let mut backend = self.lock();
        backend.call(format!("geofence {}", device))?;
        Ok(backend.geofences.get(device).cloned())
    }

    async fn create_geofence(&self, device: &str, lat: f64, lng: f64) -> crate::Result<()> {
        let mut backend = self.lock();
        backend.call(format!("create_geofence {}", device))?;
        backend.geofences.insert(
            device.to_string(),
            json!({
                "_id": format!("gf-{}", device),
                "deviceName": device,
                "latitude": lat,
                "longitude": lng,
                "radius": 1,
            }),
        );
        Ok(())
    }

    async fn update_radius(&self, device: &str, radius: f64) -> crate::Result<()> {
        let mut backend = self.lock();
        backend.call(format!("update_radius {} {}", device, radius))?;
        match backend.geofences.get_mut(device) {
            Some(record) => {
                record["radius"] = json!(radius);
                Ok(())
            }
            None => Err(crate::TrackerError::Api(format!(
                "PUT geofencing/{}/{} returned status 404: Not Found",
                device, radius
            ))),
        }
    }

    async fn delete_geofence(&self, device: &str) -> crate::Result<()> {
        let mut backend = self.lock();
        backend.call(format!("delete_geofence {}", device))?;
        backend.geofences.remove(device);
        Ok(())
    }

    async fn list_devices(&self) -> crate::Result<Vec<Device>> {
        let mut backend = self.lock();
        backend.call("list_devices".to_string())?;
        Ok(backend.devices.clone())
    }

    async fn delete_device(&self, device: &str) -> crate::Result<()> {
        let mut backend = self.lock();
        backend.call(format!("delete_device {}", device))?;
        backend.devices.retain(|d| d.id != device);
        backend.locations.remove(device);
        backend.geofences.remove(device);
        Ok(())
    }

    async fn register_device(&self, registration: &Registration) -> crate::Result<()> {
        let mut backend = self.lock();
        backend.call(format!("register_device {}", registration.device_name))?;
        backend.devices.push(Device::new(
            registration.device_name.clone(),
            Some(registration.nickname.clone()),
        ));
        backend.registrations.push(registration.clone());
        Ok(())
    }
}
