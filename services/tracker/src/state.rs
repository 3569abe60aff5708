//! Shared view state: visible devices, their display data and notification history

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::model::{Device, GeofenceView, LocationState, SourcePreference};
use crate::notifier::NotificationRecord;

/// Map center used when nothing is selected or located
pub const DEFAULT_MAP_CENTER: (f64, f64) = (20.5937, 78.9629);

/// Display data for a single device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEntry {
    pub device: Device,
    pub location: LocationState,
    pub geofence: GeofenceView,
    /// Collaborator that produced `location`
    pub location_source: Option<SourcePreference>,
    /// Collaborator that produced `geofence`
    pub geofence_source: Option<SourcePreference>,
    pub last_refresh_epoch_ms: Option<u64>,
}

impl DeviceEntry {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            location: LocationState::NotLoaded,
            geofence: GeofenceView::NotLoaded,
            location_source: None,
            geofence_source: None,
            last_refresh_epoch_ms: None,
        }
    }
}

/// Shared state accessible by the synchronizer, the session and the control API
#[derive(Debug)]
pub struct ViewState {
    pub devices: Vec<DeviceEntry>,
    pub selected: Option<usize>,
    pub history: VecDeque<NotificationRecord>,
    pub history_max_size: usize,
    pub started_at: Instant,
}

impl ViewState {
    pub fn new(history_max_size: usize) -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            history: VecDeque::with_capacity(history_max_size),
            history_max_size,
            started_at: Instant::now(),
        }
    }

    /// Replace the device list. Data of devices that stay is kept; the
    /// first device becomes the selection.
    pub fn set_devices(&mut self, devices: Vec<Device>) {
        let mut previous = std::mem::take(&mut self.devices);
        self.devices = devices
            .into_iter()
            .map(|device| match previous.iter().position(|e| e.device.id == device.id) {
                Some(index) => {
                    let mut entry = previous.swap_remove(index);
                    entry.device = device;
                    entry
                }
                None => DeviceEntry::new(device),
            })
            .collect();
        self.selected = if self.devices.is_empty() { None } else { Some(0) };
    }

    pub fn entry(&self, id: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|e| e.device.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut DeviceEntry> {
        self.devices.iter_mut().find(|e| e.device.id == id)
    }

    pub fn selected_device(&self) -> Option<&DeviceEntry> {
        self.selected.and_then(|index| self.devices.get(index))
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_device().map(|e| e.device.id.as_str())
    }

    /// Select by identifier, returning false for an unknown device
    pub fn select(&mut self, id: &str) -> bool {
        match self.devices.iter().position(|e| e.device.id == id) {
            Some(index) => {
                self.selected = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn select_index(&mut self, index: usize) -> bool {
        if index < self.devices.len() {
            self.selected = Some(index);
            true
        } else {
            false
        }
    }

    /// Move to the next device, wrapping at the end
    pub fn select_next(&mut self) -> Option<&str> {
        let len = self.devices.len();
        if len == 0 {
            return None;
        }
        self.selected = Some(self.selected.map_or(0, |i| (i + 1) % len));
        self.selected_id()
    }

    /// Move to the previous device, wrapping at the start
    pub fn select_previous(&mut self) -> Option<&str> {
        let len = self.devices.len();
        if len == 0 {
            return None;
        }
        self.selected = Some(self.selected.map_or(0, |i| (i + len - 1) % len));
        self.selected_id()
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Overwrite a device's location, returning false for an unknown device
    pub fn apply_location(
        &mut self,
        id: &str,
        location: LocationState,
        source: Option<SourcePreference>,
        now_ms: u64,
    ) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.location = location;
                entry.location_source = source;
                entry.last_refresh_epoch_ms = Some(now_ms);
                true
            }
            None => false,
        }
    }

    /// Overwrite a device's geofence, returning false for an unknown device
    pub fn apply_geofence(
        &mut self,
        id: &str,
        geofence: GeofenceView,
        source: Option<SourcePreference>,
    ) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.geofence = geofence;
                entry.geofence_source = source;
                true
            }
            None => false,
        }
    }

    /// Change the radius of a displayed geofence
    pub fn set_radius(&mut self, id: &str, radius: f64) -> bool {
        match self.entry_mut(id).map(|e| &mut e.geofence) {
            Some(GeofenceView::Present(geofence)) => {
                geofence.radius = radius;
                true
            }
            _ => false,
        }
    }

    /// Remove a device and keep the selection on a valid neighbour
    pub fn remove_device(&mut self, id: &str) -> bool {
        let Some(index) = self.devices.iter().position(|e| e.device.id == id) else {
            return false;
        };
        self.devices.remove(index);

        self.selected = match self.selected {
            _ if self.devices.is_empty() => None,
            Some(selected) if selected > index => Some(selected - 1),
            Some(selected) => Some(selected.min(self.devices.len() - 1)),
            None => None,
        };
        true
    }

    /// Add a notification to history
    pub fn add_notification(&mut self, record: NotificationRecord) {
        if self.history_max_size == 0 {
            return;
        }
        if self.history.len() >= self.history_max_size {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Where the map should be centered: the selected device's last fix
    pub fn map_center(&self) -> (f64, f64) {
        self.selected_device()
            .and_then(|e| e.location.sample())
            .map(|s| (s.lat, s.lng))
            .unwrap_or(DEFAULT_MAP_CENTER)
    }
}

/// Thread-safe shared state handle
pub type StateHandle = Arc<RwLock<ViewState>>;

pub fn new_state_handle(history_max_size: usize) -> StateHandle {
    Arc::new(RwLock::new(ViewState::new(history_max_size)))
}
