//! BDD step definitions for the device list and refresh lifecycle feature

use cucumber::{given, then, when};
use serde_json::json;

use tracker::registration::Registration;

use crate::world::{settle, TrackerWorld};

#[given("the realtime channel rejects deletes")]
async fn realtime_rejects_deletes(world: &mut TrackerWorld) {
    world.realtime.fail_deletes(true);
}

#[when(expr = "I delete {string}")]
async fn delete_device(world: &mut TrackerWorld, device: String) {
    let result = world.session().await.delete_device(&device).await;
    world.last_error = result.err().map(|e| e.to_string());
}

#[when("I load the devices")]
async fn load_devices(world: &mut TrackerWorld) {
    let result = world.session().await.load().await;
    world.last_error = result.err().map(|e| e.to_string());
}

#[when(expr = "I register device {string} with code {string} as {string}")]
async fn register_device(world: &mut TrackerWorld, name: String, code: String, nickname: String) {
    let registration = Registration::new(&name, &code, None, &nickname).unwrap();
    let result = world.session().await.register(registration).await;
    world.last_error = result.err().map(|e| e.to_string());
}

#[when("I follow the selected device")]
async fn follow_selected(world: &mut TrackerWorld) {
    world.session().await.sync_selection().await;
    settle().await;
}

#[when("I select the next device")]
async fn select_next(world: &mut TrackerWorld) {
    world.session().await.select_next().await;
}

#[when("I deselect the device")]
async fn deselect(world: &mut TrackerWorld) {
    world.session().await.deselect().await;
    settle().await;
}

#[when(expr = "the realtime channel pushes timestamp {string} for {string}")]
async fn realtime_pushes(world: &mut TrackerWorld, timestamp: String, device: String) {
    world
        .realtime
        .set(&format!("{}/Realtime", device), json!({ "timestamp": timestamp }));
    settle().await;
}

#[then(expr = "the visible devices are {string}")]
async fn visible_devices(world: &mut TrackerWorld, expected: String) {
    let sync = world.synchronizer().await;
    let state = sync.state().read().await;
    let ids: Vec<&str> = state.devices.iter().map(|e| e.device.id.as_str()).collect();
    let expected: Vec<&str> = expected.split(", ").collect();
    assert_eq!(ids, expected);
}

#[then(expr = "{int} live subscriptions are open")]
async fn live_subscriptions(world: &mut TrackerWorld, count: usize) {
    assert_eq!(world.realtime.active_subscriptions(), count);
}

#[then(expr = "the followed device is {string}")]
async fn followed_device(world: &mut TrackerWorld, device: String) {
    let session = world.session().await;
    assert_eq!(session.active_device(), Some(device.as_str()));
}
