//! Device location synchronizer
//!
//! Decides, per device, whether location and geofence data come from the
//! realtime channel or the polling endpoint, remembers that choice and
//! writes the reconciled result into the shared view state. Every
//! user-facing action that touches a collaborator goes through here.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::api::PollingEndpoint;
use crate::model::{
    Device, GeofenceState, GeofenceView, LocationSample, LocationState, SourcePreference,
    DEFAULT_GEOFENCE_RADIUS,
};
use crate::notifier::{Notification, NotificationRecord, Notifier};
use crate::preference::PreferenceStore;
use crate::realtime::{self, RealtimeChannel};
use crate::reconcile::Resolution;
use crate::record;
use crate::registration::Registration;
use crate::state::{DeviceEntry, StateHandle};

/// What one half of a refresh produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// A record was accepted from this source
    Found(SourcePreference),
    /// Every source consulted had nothing usable
    NoData,
    /// The polling endpoint failed; the view state was left as it was
    Failed,
}

impl<T> From<&Resolution<T>> for Fetch {
    fn from(resolution: &Resolution<T>) -> Self {
        match resolution.source() {
            Some(source) => Fetch::Found(source),
            None => Fetch::NoData,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub location: Fetch,
    pub geofence: Fetch,
}

impl RefreshOutcome {
    pub fn has_data(&self) -> bool {
        matches!(self.location, Fetch::Found(_)) || matches!(self.geofence, Fetch::Found(_))
    }

    pub fn failed(&self) -> bool {
        self.location == Fetch::Failed || self.geofence == Fetch::Failed
    }
}

pub struct Synchronizer {
    realtime: Arc<dyn RealtimeChannel>,
    polling: Arc<dyn PollingEndpoint>,
    preferences: Arc<dyn PreferenceStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
    state: StateHandle,
    customer_id: Option<String>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("preferences", &self.preferences)
            .field("notifiers", &self.notifiers)
            .finish()
    }
}

impl Synchronizer {
    pub fn new(
        realtime: Arc<dyn RealtimeChannel>,
        polling: Arc<dyn PollingEndpoint>,
        preferences: Arc<dyn PreferenceStore>,
        state: StateHandle,
    ) -> Self {
        Self {
            realtime,
            polling,
            preferences,
            notifiers: Vec::new(),
            state,
            customer_id: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Customer attached to registrations that do not name one
    pub fn with_customer(mut self, customer_id: Option<String>) -> Self {
        self.customer_id = customer_id;
        self
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn realtime(&self) -> &Arc<dyn RealtimeChannel> {
        &self.realtime
    }

    pub fn preference(&self, device: &str) -> Option<SourcePreference> {
        self.preferences.get(device)
    }

    /// Collaborator that owns geofence writes; an unset preference means polling
    pub fn owner(&self, device: &str) -> SourcePreference {
        self.preference(device).unwrap_or(SourcePreference::Polling)
    }

    pub async fn entry(&self, device: &str) -> Option<DeviceEntry> {
        self.state.read().await.entry(device).cloned()
    }

    // --- Refresh ---

    /// Fetch location and geofence, realtime first with polling as fallback
    pub async fn refresh_device(&self, device: &str) -> RefreshOutcome {
        tracing::debug!("Refreshing '{}'", device);

        let location = match self.fetch_location(device).await {
            Ok(resolution) => {
                if let Some(source) = resolution.source() {
                    self.remember(device, source);
                }
                self.store_location(device, resolution).await
            }
            Err(e) => {
                self.report_error(device, "Failed to fetch device data", &e)
                    .await;
                Fetch::Failed
            }
        };

        let geofence = match self.fetch_geofence(device).await {
            Ok(resolution) => self.store_geofence(device, resolution).await,
            Err(e) => {
                self.report_error(device, "Failed to fetch device data", &e)
                    .await;
                Fetch::Failed
            }
        };

        let outcome = RefreshOutcome { location, geofence };
        tracing::debug!("Refreshed '{}': {:?}", device, outcome);
        outcome
    }

    /// Fetch from a single source, without fallback and without touching the preference
    pub async fn refresh_from(&self, device: &str, source: SourcePreference) -> RefreshOutcome {
        let location = match source {
            SourcePreference::Realtime => Ok(self.realtime_location(device).await),
            SourcePreference::Polling => self.polling_location(device).await,
        };
        let location = match location {
            Ok(value) => {
                self.store_location(device, Resolution::from_source(source, value))
                    .await
            }
            Err(e) => {
                self.report_error(device, "Failed to fetch device data", &e)
                    .await;
                Fetch::Failed
            }
        };

        let geofence = match source {
            SourcePreference::Realtime => Ok(self.realtime_geofence(device).await),
            SourcePreference::Polling => self.polling_geofence(device).await,
        };
        let geofence = match geofence {
            Ok(value) => {
                self.store_geofence(device, Resolution::from_source(source, value))
                    .await
            }
            Err(e) => {
                self.report_error(device, "Failed to fetch device data", &e)
                    .await;
                Fetch::Failed
            }
        };

        RefreshOutcome { location, geofence }
    }

    /// Flip the device's source and reload from the new source only
    pub async fn toggle_source(&self, device: &str) -> crate::Result<SourcePreference> {
        self.ensure_known(device).await?;
        let source = self.owner(device).toggled();
        self.preferences.set(device, source)?;
        tracing::info!("Source for '{}' switched to {}", device, source);

        self.refresh_from(device, source).await;
        self.notify(
            Notification::info(format!("Switched to {} data source", source)).for_device(device),
        )
        .await;
        Ok(source)
    }

    /// The user-facing "Refresh" action
    pub async fn user_refresh(&self, device: &str) -> crate::Result<RefreshOutcome> {
        self.ensure_known(device).await?;
        let outcome = self.refresh_device(device).await;
        if outcome.has_data() {
            self.notify(
                Notification::success("Device data refreshed successfully").for_device(device),
            )
            .await;
        }
        Ok(outcome)
    }

    // --- Live updates ---

    /// Apply a location push from the realtime channel. Returns whether it was accepted.
    pub async fn apply_location_push(&self, device: &str, value: Option<Value>) -> bool {
        let Some(sample) = value.as_ref().and_then(record::location_from_realtime) else {
            tracing::debug!("Ignoring unusable location push for '{}'", device);
            return false;
        };
        self.remember(device, SourcePreference::Realtime);
        self.state.write().await.apply_location(
            device,
            LocationState::Found(sample),
            Some(SourcePreference::Realtime),
            current_epoch_ms(),
        )
    }

    /// Apply a geofence push from the realtime channel. Returns whether it was accepted.
    pub async fn apply_geofence_push(&self, device: &str, value: Option<Value>) -> bool {
        let Some(value) = value else {
            tracing::debug!("Ignoring empty geofence push for '{}'", device);
            return false;
        };
        let (battery, main) = self.telemetry(device).await;
        let Some(geofence) = record::geofence_from_realtime(&value, battery, main) else {
            tracing::debug!("Ignoring malformed geofence push for '{}'", device);
            return false;
        };
        self.state.write().await.apply_geofence(
            device,
            GeofenceView::Present(geofence),
            Some(SourcePreference::Realtime),
        )
    }

    // --- Geofence actions ---

    /// Create a geofence around the device's last known position
    pub async fn add_geofence(&self, device: &str) -> crate::Result<GeofenceState> {
        let entry = self.known_entry(device).await?;
        let Some(sample) = entry.location.sample().cloned() else {
            let message = "Device location data is required to create a geofence";
            self.notify(Notification::error(message).for_device(device))
                .await;
            return Err(crate::TrackerError::Validation(message.to_string()));
        };

        let owner = self.owner(device);
        let result = match owner {
            SourcePreference::Realtime => {
                let value = json!({
                    "lat": sample.lat,
                    "lng": sample.lng,
                    "radius": DEFAULT_GEOFENCE_RADIUS,
                });
                self.realtime
                    .write(&realtime::geofence_path(device), &value)
                    .await
            }
            SourcePreference::Polling => {
                self.polling
                    .create_geofence(device, sample.lat, sample.lng)
                    .await
            }
        };
        if let Err(e) = result {
            self.report_error(device, "Failed to add geofence", &e)
                .await;
            return Err(e);
        }

        let geofence = GeofenceState::new(sample.lat, sample.lng, DEFAULT_GEOFENCE_RADIUS);
        self.state.write().await.apply_geofence(
            device,
            GeofenceView::Present(geofence.clone()),
            Some(owner),
        );
        self.notify(
            Notification::success("Geofencing coordinates added successfully").for_device(device),
        )
        .await;
        Ok(geofence)
    }

    pub async fn update_radius(&self, device: &str, radius: f64) -> crate::Result<()> {
        self.ensure_known(device).await?;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(crate::TrackerError::Validation(format!(
                "Radius must be a positive number, got {}",
                radius
            )));
        }

        let result = match self.owner(device) {
            SourcePreference::Realtime => {
                self.realtime
                    .write(&realtime::radius_path(device), &json!(radius))
                    .await
            }
            SourcePreference::Polling => self.polling.update_radius(device, radius).await,
        };
        if let Err(e) = result {
            self.report_error(device, "Failed to update radius", &e)
                .await;
            return Err(e);
        }

        self.state.write().await.set_radius(device, radius);
        self.notify(
            Notification::success(format!("Radius updated to {}km successfully", radius))
                .for_device(device),
        )
        .await;
        Ok(())
    }

    pub async fn remove_geofence(&self, device: &str) -> crate::Result<()> {
        self.ensure_known(device).await?;
        let result = match self.owner(device) {
            SourcePreference::Realtime => {
                self.realtime.delete(&realtime::geofence_path(device)).await
            }
            SourcePreference::Polling => self.polling.delete_geofence(device).await,
        };
        if let Err(e) = result {
            self.report_error(device, "Failed to delete geofence", &e)
                .await;
            return Err(e);
        }

        self.state
            .write()
            .await
            .apply_geofence(device, GeofenceView::Absent, None);
        self.notify(
            Notification::success("Geofencing coordinates deleted successfully").for_device(device),
        )
        .await;
        Ok(())
    }

    // --- Device list actions ---

    /// Replace the device list from the backend and refresh every device once
    pub async fn load_devices(&self) -> crate::Result<Vec<Device>> {
        let devices = match self.polling.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                self.report_error("", "Failed to fetch device data", &e)
                    .await;
                return Err(e);
            }
        };
        tracing::info!("Loaded {} device(s)", devices.len());

        self.state.write().await.set_devices(devices.clone());
        if devices.is_empty() {
            self.notify(Notification::info(
                "You don't have any registered devices. Please register a device.",
            ))
            .await;
        }

        for device in &devices {
            self.refresh_device(&device.id).await;
        }
        Ok(devices)
    }

    /// Delete on the backend, then clean up everything held locally
    pub async fn delete_device(&self, device: &str) -> crate::Result<()> {
        self.ensure_known(device).await?;
        if let Err(e) = self.polling.delete_device(device).await {
            self.report_error(device, "Failed to delete device", &e)
                .await;
            return Err(e);
        }

        if let Err(e) = self.realtime.delete(&realtime::device_root(device)).await {
            tracing::warn!("Failed to delete realtime data for '{}': {}", device, e);
        }
        if let Err(e) = self.preferences.remove(device) {
            tracing::warn!("Failed to forget source for '{}': {}", device, e);
        }

        self.state.write().await.remove_device(device);
        self.notify(
            Notification::success("Device deleted successfully").for_device(device),
        )
        .await;
        Ok(())
    }

    pub async fn register_device(&self, registration: Registration) -> crate::Result<Vec<Device>> {
        let registration = registration.with_default_customer(self.customer_id.as_deref());
        if let Err(e) = self.polling.register_device(&registration).await {
            self.report_error(
                &registration.device_name,
                "Failed to register the device. Please try again.",
                &e,
            )
            .await;
            return Err(e);
        }

        self.notify(
            Notification::success("Device registered successfully!")
                .for_device(registration.device_name.clone()),
        )
        .await;
        self.load_devices().await
    }

    /// Map link for the device's last known position
    pub async fn share_link(&self, device: &str) -> crate::Result<String> {
        let entry = self.known_entry(device).await?;
        match entry.location.sample() {
            Some(sample) => Ok(sample.share_link()),
            None => {
                let message = "No location data available to share";
                self.notify(Notification::error(message).for_device(device))
                    .await;
                Err(crate::TrackerError::NotFound(message.to_string()))
            }
        }
    }

    // --- Notifications ---

    /// Deliver a notification to every notifier and record it in history
    pub async fn notify(&self, notification: Notification) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!("Notification via '{}' failed: {}", notifier.type_name(), e);
            }
        }
        self.state
            .write()
            .await
            .add_notification(NotificationRecord::new(&notification, current_epoch_ms()));
    }

    async fn report_error(&self, device: &str, message: &str, error: &crate::TrackerError) {
        tracing::warn!("{} ('{}'): {}", message, device, error);
        let notification = Notification::error(message);
        let notification = if device.is_empty() {
            notification
        } else {
            notification.for_device(device)
        };
        self.notify(notification).await;
    }

    // --- Internals ---

    async fn known_entry(&self, device: &str) -> crate::Result<DeviceEntry> {
        self.entry(device)
            .await
            .ok_or_else(|| crate::TrackerError::NotFound(format!("Unknown device '{}'", device)))
    }

    async fn ensure_known(&self, device: &str) -> crate::Result<()> {
        self.known_entry(device).await.map(|_| ())
    }

    fn remember(&self, device: &str, source: SourcePreference) {
        if let Err(e) = self.preferences.set(device, source) {
            tracing::warn!("Failed to persist source for '{}': {}", device, e);
        }
    }

    async fn fetch_location(&self, device: &str) -> crate::Result<Resolution<LocationSample>> {
        let realtime = self.realtime_location(device).await;
        if !Resolution::needs_fallback(&realtime) {
            return Ok(Resolution::resolve(realtime, None));
        }
        let polling = self.polling_location(device).await?;
        Ok(Resolution::resolve(realtime, polling))
    }

    async fn fetch_geofence(&self, device: &str) -> crate::Result<Resolution<GeofenceState>> {
        let realtime = self.realtime_geofence(device).await;
        if !Resolution::needs_fallback(&realtime) {
            return Ok(Resolution::resolve(realtime, None));
        }
        let polling = self.polling_geofence(device).await?;
        Ok(Resolution::resolve(realtime, polling))
    }

    /// Realtime read errors count as "no data" so the fallback still runs
    async fn realtime_location(&self, device: &str) -> Option<LocationSample> {
        let value = self.realtime_read(&realtime::location_path(device)).await?;
        record::location_from_realtime(&value)
    }

    async fn realtime_geofence(&self, device: &str) -> Option<GeofenceState> {
        let value = self.realtime_read(&realtime::geofence_path(device)).await?;
        let (battery, main) = self.telemetry(device).await;
        record::geofence_from_realtime(&value, battery, main)
    }

    async fn telemetry(&self, device: &str) -> (Option<Value>, Option<Value>) {
        let battery = self.realtime_read(&realtime::battery_path(device)).await;
        let main = self.realtime_read(&realtime::main_path(device)).await;
        (battery, main)
    }

    async fn realtime_read(&self, path: &str) -> Option<Value> {
        match self.realtime.read(path).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Realtime read of {} failed: {}", path, e);
                None
            }
        }
    }

    async fn polling_location(&self, device: &str) -> crate::Result<Option<LocationSample>> {
        let record = self.polling.location(device).await?;
        Ok(record.as_ref().and_then(record::location_from_polling))
    }

    async fn polling_geofence(&self, device: &str) -> crate::Result<Option<GeofenceState>> {
        let record = self.polling.geofence(device).await?;
        Ok(record.as_ref().and_then(record::geofence_from_polling))
    }

    async fn store_location(&self, device: &str, resolution: Resolution<LocationSample>) -> Fetch {
        let fetch = Fetch::from(&resolution);
        let source = resolution.source();
        self.state.write().await.apply_location(
            device,
            LocationState::from(resolution),
            source,
            current_epoch_ms(),
        );
        fetch
    }

    async fn store_geofence(&self, device: &str, resolution: Resolution<GeofenceState>) -> Fetch {
        let fetch = Fetch::from(&resolution);
        let source = resolution.source();
        self.state
            .write()
            .await
            .apply_geofence(device, GeofenceView::from(resolution), source);
        fetch
    }
}

fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
