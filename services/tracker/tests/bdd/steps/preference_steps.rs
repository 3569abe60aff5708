//! BDD step definitions for the persisted preferences feature

use cucumber::{given, when};

use crate::world::TrackerWorld;

#[given("a preference file")]
async fn preference_file(world: &mut TrackerWorld) {
    world.preferences_dir = Some(tempfile::tempdir().unwrap());
}

#[given(expr = "a preference file containing {string}")]
async fn preference_file_containing(world: &mut TrackerWorld, content: String) {
    world.preferences_dir = Some(tempfile::tempdir().unwrap());
    let path = world.preferences_path().unwrap();
    std::fs::write(path, content).unwrap();
}

#[when("the service restarts")]
async fn service_restarts(world: &mut TrackerWorld) {
    world.restart().await;
}
