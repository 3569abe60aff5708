//! Devices, location samples, geofences and source preferences

use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

use crate::record;

/// Radius (km) given to a freshly created geofence, and to records that omit one
pub const DEFAULT_GEOFENCE_RADIUS: f64 = 1.0;

/// Samples older than this mark the device as stale
pub const STALE_AFTER_MINUTES: i64 = 60;

/// A registered tracking device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: id.into(),
            label,
        }
    }

    /// Friendly name, falling back to the identifier
    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.id,
        }
    }
}

/// Which collaborator is authoritative for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    #[serde(alias = "firebase")]
    Realtime,
    #[serde(alias = "api")]
    Polling,
}

impl SourcePreference {
    pub fn toggled(self) -> Self {
        match self {
            SourcePreference::Realtime => SourcePreference::Polling,
            SourcePreference::Polling => SourcePreference::Realtime,
        }
    }
}

impl fmt::Display for SourcePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePreference::Realtime => write!(f, "realtime"),
            SourcePreference::Polling => write!(f, "polling"),
        }
    }
}

/// A single position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    /// `"{date} {time}"` exactly as reported by the device
    pub last_updated: String,
}

impl LocationSample {
    /// Parsed report time, if the stored text is still interpretable
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        let (date, time) = self.last_updated.split_once(' ')?;
        record::parse_date_time(date, time)
    }

    pub fn share_link(&self) -> String {
        format!(
            "https://www.google.com/maps/place/{},{}",
            self.lat, self.lng
        )
    }
}

/// Location as displayed for a device
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocationState {
    #[default]
    NotLoaded,
    /// Both sources were asked and neither had a usable record
    NotFound,
    Found(LocationSample),
}

impl LocationState {
    pub fn found(&self) -> bool {
        matches!(self, LocationState::Found(_))
    }

    pub fn sample(&self) -> Option<&LocationSample> {
        match self {
            LocationState::Found(sample) => Some(sample),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationView<'a> {
    loaded: bool,
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<&'a str>,
}

impl Serialize for LocationState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sample = self.sample();
        LocationView {
            loaded: !matches!(self, LocationState::NotLoaded),
            found: self.found(),
            lat: sample.map(|s| s.lat),
            lng: sample.map(|s| s.lng),
            last_updated: sample.map(|s| s.last_updated.as_str()),
        }
        .serialize(serializer)
    }
}

/// A boundary-alert region around a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceState {
    pub lat: f64,
    pub lng: f64,
    pub radius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<serde_json::Value>,
}

impl GeofenceState {
    pub fn new(lat: f64, lng: f64, radius: f64) -> Self {
        Self {
            lat,
            lng,
            radius,
            battery: None,
            main: None,
        }
    }
}

/// Geofence as displayed for a device
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GeofenceView {
    #[default]
    NotLoaded,
    Absent,
    Present(GeofenceState),
}

impl GeofenceView {
    pub fn geofence(&self) -> Option<&GeofenceState> {
        match self {
            GeofenceView::Present(geofence) => Some(geofence),
            _ => None,
        }
    }
}

/// Freshness of a device's last report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Stale,
    Offline,
}

impl DeviceStatus {
    pub fn from_location(location: &LocationState, now: NaiveDateTime) -> Self {
        let Some(recorded_at) = location.sample().and_then(LocationSample::recorded_at) else {
            return DeviceStatus::Offline;
        };
        if now - recorded_at < Duration::minutes(STALE_AFTER_MINUTES) {
            DeviceStatus::Online
        } else {
            DeviceStatus::Stale
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "Online"),
            DeviceStatus::Stale => write!(f, "Stale"),
            DeviceStatus::Offline => write!(f, "Offline"),
        }
    }
}
