//! BDD step definitions for tracker service

pub mod geofence_steps;
pub mod lifecycle_steps;
pub mod preference_steps;
pub mod synchronizer_steps;
