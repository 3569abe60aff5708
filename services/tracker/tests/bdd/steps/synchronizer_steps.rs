//! BDD step definitions for the synchronization feature

use cucumber::{given, then, when};
use serde_json::json;

use tracker::model::{Device, GeofenceView, LocationState, SourcePreference};
use tracker::notifier::Severity;

use crate::world::TrackerWorld;

fn parse_source(s: &str) -> SourcePreference {
    match s {
        "realtime" => SourcePreference::Realtime,
        "polling" => SourcePreference::Polling,
        other => panic!("Unknown source: {}", other),
    }
}

#[given(expr = "a registered device {string}")]
async fn registered_device(world: &mut TrackerWorld, device: String) {
    world.devices.push(device);
    world.polling.set_devices(
        world
            .devices
            .iter()
            .map(|id| Device::new(id.clone(), None))
            .collect(),
    );
}

#[given(expr = "the realtime channel reports timestamp {string} for {string}")]
async fn realtime_reports(world: &mut TrackerWorld, timestamp: String, device: String) {
    world
        .realtime
        .set(&format!("{}/Realtime", device), json!({ "timestamp": timestamp }));
}

#[given(expr = "the polling endpoint reports {string} {string} at {string}, {string} for {string}")]
async fn polling_reports(
    world: &mut TrackerWorld,
    date: String,
    time: String,
    latitude: String,
    longitude: String,
    device: String,
) {
    world.polling.set_location(
        &device,
        json!({
            "date": date,
            "time": time,
            "latitude": latitude,
            "longitude": longitude,
        }),
    );
}

#[given(expr = "the polling endpoint stores a geofence at {float}, {float} with radius {float} for {string}")]
async fn polling_stores_geofence(
    world: &mut TrackerWorld,
    latitude: f64,
    longitude: f64,
    radius: f64,
    device: String,
) {
    world.polling.set_geofence(
        &device,
        json!({
            "_id": format!("gf-{}", device),
            "latitude": latitude,
            "longitude": longitude,
            "radius": radius,
        }),
    );
}

#[when(expr = "I refresh {string}")]
async fn refresh(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    world.last_outcome = Some(sync.refresh_device(&device).await);
}

#[when("the polling endpoint starts failing")]
async fn polling_fails(world: &mut TrackerWorld) {
    world.polling.fail_all(true);
}

#[when(expr = "I toggle the source of {string}")]
async fn toggle_source(world: &mut TrackerWorld, device: String) {
    let result = world.session().await.toggle_source(&device).await;
    world.last_error = result.err().map(|e| e.to_string());
}

#[then(expr = "the location of {string} is {float}, {float} updated {string}")]
async fn location_is(
    world: &mut TrackerWorld,
    device: String,
    lat: f64,
    lng: f64,
    last_updated: String,
) {
    let sync = world.synchronizer().await;
    let entry = sync.entry(&device).await.expect("device should be visible");
    let sample = entry
        .location
        .sample()
        .unwrap_or_else(|| panic!("expected a location, got {:?}", entry.location));
    assert_eq!(sample.lat, lat);
    assert_eq!(sample.lng, lng);
    assert_eq!(sample.last_updated, last_updated);
}

#[then(expr = "{string} has no location data")]
async fn no_location(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    let entry = sync.entry(&device).await.expect("device should be visible");
    assert_eq!(entry.location, LocationState::NotFound);
}

#[then(expr = "{string} has no geofence")]
async fn no_geofence(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    let entry = sync.entry(&device).await.expect("device should be visible");
    assert_eq!(entry.geofence, GeofenceView::Absent);
}

#[then(expr = "{string} has a geofence with radius {float}")]
async fn geofence_radius(world: &mut TrackerWorld, device: String, radius: f64) {
    let sync = world.synchronizer().await;
    let entry = sync.entry(&device).await.expect("device should be visible");
    let geofence = entry
        .geofence
        .geofence()
        .unwrap_or_else(|| panic!("expected a geofence, got {:?}", entry.geofence));
    assert_eq!(geofence.radius, radius);
}

#[then(expr = "the source preference of {string} is {string}")]
async fn preference_is(world: &mut TrackerWorld, device: String, source: String) {
    let sync = world.synchronizer().await;
    assert_eq!(sync.preference(&device), Some(parse_source(&source)));
}

#[then(expr = "the source preference of {string} is unset")]
async fn preference_unset(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    assert_eq!(sync.preference(&device), None);
}

#[then(expr = "the polling endpoint was asked for the location of {string} {int} times")]
async fn polling_asked(world: &mut TrackerWorld, device: String, times: usize) {
    assert_eq!(
        world.polling.call_count(&format!("location {}", device)),
        times
    );
}

#[then(expr = "the last notification says {string}")]
async fn last_notification(world: &mut TrackerWorld, message: String) {
    let notification = world
        .last_notification()
        .expect("a notification should have been raised");
    assert_eq!(notification.message, message);
}

#[then(expr = "the last notification is an error saying {string}")]
async fn last_error_notification(world: &mut TrackerWorld, message: String) {
    let notification = world
        .last_notification()
        .expect("a notification should have been raised");
    assert_eq!(notification.severity, Severity::Error);
    assert_eq!(notification.message, message);
}
