//! Which collaborator's answer wins for a device
//!
//! The fallback policy lives here as pure functions over already-fetched
//! answers, so the synchronizer only decides *whether* to ask the polling
//! endpoint and this module decides what the answers mean.

use crate::model::{GeofenceState, GeofenceView, LocationSample, LocationState, SourcePreference};

/// Outcome of asking the collaborators for one kind of record
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Realtime(T),
    Polling(T),
    NoData,
}

impl<T> Resolution<T> {
    /// Realtime wins whenever it produced a record; polling is the fallback
    pub fn resolve(realtime: Option<T>, polling: Option<T>) -> Self {
        match (realtime, polling) {
            (Some(value), _) => Resolution::Realtime(value),
            (None, Some(value)) => Resolution::Polling(value),
            (None, None) => Resolution::NoData,
        }
    }

    /// Answer from a single, explicitly chosen source
    pub fn from_source(source: SourcePreference, value: Option<T>) -> Self {
        match (source, value) {
            (SourcePreference::Realtime, Some(value)) => Resolution::Realtime(value),
            (SourcePreference::Polling, Some(value)) => Resolution::Polling(value),
            (_, None) => Resolution::NoData,
        }
    }

    /// Whether the polling endpoint still has to be consulted after the realtime answer
    pub fn needs_fallback(realtime: &Option<T>) -> bool {
        realtime.is_none()
    }

    pub fn source(&self) -> Option<SourcePreference> {
        match self {
            Resolution::Realtime(_) => Some(SourcePreference::Realtime),
            Resolution::Polling(_) => Some(SourcePreference::Polling),
            Resolution::NoData => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Resolution::Realtime(value) | Resolution::Polling(value) => Some(value),
            Resolution::NoData => None,
        }
    }
}

impl From<Resolution<LocationSample>> for LocationState {
    fn from(resolution: Resolution<LocationSample>) -> Self {
        match resolution.into_value() {
            Some(sample) => LocationState::Found(sample),
            None => LocationState::NotFound,
        }
    }
}

impl From<Resolution<GeofenceState>> for GeofenceView {
    fn from(resolution: Resolution<GeofenceState>) -> Self {
        match resolution.into_value() {
            Some(geofence) => GeofenceView::Present(geofence),
            None => GeofenceView::Absent,
        }
    }
}
