//! JSON control API over the view state and the user-facing actions

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::model::{DeviceStatus, GeofenceView, LocationState, SourcePreference};
use crate::registration::Registration;
use crate::session::Session;
use crate::state::DeviceEntry;
use crate::synchronizer::Synchronizer;
use crate::TrackerError;

/// Control API application state
#[derive(Clone)]
pub struct ControlState {
    pub sync: Arc<Synchronizer>,
    pub session: Arc<Mutex<Session>>,
}

/// Build the control API axum router
pub fn build_router(sync: Arc<Synchronizer>, session: Arc<Mutex<Session>>) -> Router {
    let control_state = ControlState { sync, session };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/history", get(history_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/devices/register", post(register_handler))
        .route(
            "/api/devices/{id}",
            get(device_handler).delete(delete_device_handler),
        )
        .route("/api/devices/{id}/select", post(select_handler))
        .route("/api/devices/{id}/refresh", post(refresh_handler))
        .route("/api/devices/{id}/toggle-source", post(toggle_handler))
        .route("/api/devices/{id}/share", get(share_handler))
        .route(
            "/api/devices/{id}/geofence",
            post(add_geofence_handler).delete(remove_geofence_handler),
        )
        .route("/api/devices/{id}/geofence/{radius}", put(radius_handler))
        .route(
            "/api/selection",
            get(selection_handler).delete(deselect_handler),
        )
        .route("/api/selection/next", post(select_next_handler))
        .route("/api/selection/previous", post(select_previous_handler))
        .route("/api/selection/{index}", post(select_index_handler))
        .with_state(control_state)
}

/// Error body `{"error": "..."}` with a status derived from the error kind
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(error: TrackerError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::Validation(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_GATEWAY,
        };
        let message = match self.0 {
            TrackerError::Validation(message) | TrackerError::NotFound(message) => message,
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceView<'a> {
    id: &'a str,
    label: &'a str,
    status: DeviceStatus,
    preference: Option<SourcePreference>,
    location: &'a LocationState,
    geofence: &'a GeofenceView,
    location_source: Option<SourcePreference>,
    geofence_source: Option<SourcePreference>,
    last_refresh_epoch_ms: Option<u64>,
}

fn device_view(sync: &Synchronizer, entry: &DeviceEntry, now: NaiveDateTime) -> serde_json::Value {
    let view = DeviceView {
        id: &entry.device.id,
        label: entry.device.display_label(),
        status: DeviceStatus::from_location(&entry.location, now),
        preference: sync.preference(&entry.device.id),
        location: &entry.location,
        geofence: &entry.geofence,
        location_source: entry.location_source,
        geofence_source: entry.geofence_source,
        last_refresh_epoch_ms: entry.last_refresh_epoch_ms,
    };
    serde_json::to_value(view).unwrap_or_default()
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

async fn device_json(sync: &Synchronizer, id: &str) -> ApiResult<Json<serde_json::Value>> {
    let entry = sync
        .entry(id)
        .await
        .ok_or_else(|| TrackerError::NotFound(format!("Unknown device '{}'", id)))?;
    Ok(Json(device_view(sync, &entry, now())))
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn devices_handler(State(control): State<ControlState>) -> impl IntoResponse {
    let state = control.sync.state().read().await;
    let now = now();
    let devices: Vec<serde_json::Value> = state
        .devices
        .iter()
        .map(|entry| device_view(&control.sync, entry, now))
        .collect();
    let (lat, lng) = state.map_center();

    Json(json!({
        "selected": state.selected_id(),
        "mapCenter": { "lat": lat, "lng": lng },
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "devices": devices,
    }))
}

async fn device_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    device_json(&control.sync, &id).await
}

async fn history_handler(State(control): State<ControlState>) -> impl IntoResponse {
    let state = control.sync.state().read().await;
    let history: Vec<_> = state.history.iter().cloned().collect();
    Json(history)
}

async fn select_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    control.session.lock().await.select(&id).await?;
    device_json(&control.sync, &id).await
}

/// `{"selected": id | null, "device": view | null}`
async fn selection_json(sync: &Synchronizer) -> Json<serde_json::Value> {
    let state = sync.state().read().await;
    let device = state
        .selected_device()
        .map(|entry| device_view(sync, entry, now()));
    Json(json!({
        "selected": state.selected_id(),
        "device": device,
    }))
}

async fn selection_handler(State(control): State<ControlState>) -> impl IntoResponse {
    selection_json(&control.sync).await
}

async fn select_next_handler(State(control): State<ControlState>) -> impl IntoResponse {
    control.session.lock().await.select_next().await;
    selection_json(&control.sync).await
}

async fn select_previous_handler(State(control): State<ControlState>) -> impl IntoResponse {
    control.session.lock().await.select_previous().await;
    selection_json(&control.sync).await
}

async fn select_index_handler(
    State(control): State<ControlState>,
    Path(index): Path<usize>,
) -> ApiResult<Json<serde_json::Value>> {
    control.session.lock().await.select_index(index).await?;
    Ok(selection_json(&control.sync).await)
}

async fn deselect_handler(State(control): State<ControlState>) -> impl IntoResponse {
    control.session.lock().await.deselect().await;
    selection_json(&control.sync).await
}

async fn refresh_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    control.sync.user_refresh(&id).await?;
    device_json(&control.sync, &id).await
}

async fn toggle_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let source = control.session.lock().await.toggle_source(&id).await?;
    Ok(Json(json!({
        "source": source,
        "message": format!("Switched to {} data source", source),
    })))
}

async fn add_geofence_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let geofence = control.sync.add_geofence(&id).await?;
    Ok((StatusCode::CREATED, Json(geofence)))
}

async fn radius_handler(
    State(control): State<ControlState>,
    Path((id, radius)): Path<(String, f64)>,
) -> ApiResult<Json<serde_json::Value>> {
    control.sync.update_radius(&id, radius).await?;
    device_json(&control.sync, &id).await
}

async fn remove_geofence_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    control.sync.remove_geofence(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_device_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    control.session.lock().await.delete_device(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share_handler(
    State(control): State<ControlState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let link = control.sync.share_link(&id).await?;
    Ok(Json(json!({ "link": link })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    device_code: String,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    nickname: String,
}

async fn register_handler(
    State(control): State<ControlState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let registration = Registration::new(
        &request.device_name,
        &request.device_code,
        request.customer_id,
        &request.nickname,
    )?;
    let devices = control.session.lock().await.register(registration).await?;
    Ok((StatusCode::CREATED, Json(devices)))
}
