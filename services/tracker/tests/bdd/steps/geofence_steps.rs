//! BDD step definitions for the geofence feature

use cucumber::{then, when};
use serde_json::json;

use crate::world::TrackerWorld;

#[when(expr = "I add a geofence to {string}")]
async fn add_geofence(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    world.last_error = sync
        .add_geofence(&device)
        .await
        .err()
        .map(|e| e.to_string());
}

#[when(expr = "I set the radius of {string} to {float}")]
async fn set_radius(world: &mut TrackerWorld, device: String, radius: f64) {
    let sync = world.synchronizer().await;
    world.last_error = sync
        .update_radius(&device, radius)
        .await
        .err()
        .map(|e| e.to_string());
}

#[when(expr = "I remove the geofence of {string}")]
async fn remove_geofence(world: &mut TrackerWorld, device: String) {
    let sync = world.synchronizer().await;
    world.last_error = sync
        .remove_geofence(&device)
        .await
        .err()
        .map(|e| e.to_string());
}

#[then(expr = "the action fails with {string}")]
async fn action_fails(world: &mut TrackerWorld, message: String) {
    let error = world
        .last_error
        .as_deref()
        .expect("the action should have failed");
    assert!(
        error.contains(&message),
        "expected '{}' in '{}'",
        message,
        error
    );
}

#[then(expr = "the backend geofence of {string} has radius {float}")]
async fn backend_radius(world: &mut TrackerWorld, device: String, radius: f64) {
    let record = world
        .polling
        .geofence_record(&device)
        .expect("backend should store a geofence");
    assert_eq!(record["radius"].as_f64(), Some(radius));
}

#[then(expr = "the backend has no geofence for {string}")]
async fn backend_no_geofence(world: &mut TrackerWorld, device: String) {
    assert!(world.polling.geofence_record(&device).is_none());
}

#[then(expr = "the realtime path {string} holds {float}")]
async fn realtime_holds(world: &mut TrackerWorld, path: String, value: f64) {
    assert_eq!(world.realtime.get(&path), Some(json!(value)));
}
