//! Backend REST API: the polling collaborator plus device management

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ApiConfig;
use crate::io::{HttpClient, HttpResponse};
use crate::model::Device;
use crate::registration::Registration;

/// Request/response collaborator keyed by device identifier
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait PollingEndpoint: Send + Sync {
    /// Raw latest location record; `None` when the backend has nothing
    async fn location(&self, device: &str) -> crate::Result<Option<Value>>;

    /// Raw stored geofence record; `None` when the backend has nothing
    async fn geofence(&self, device: &str) -> crate::Result<Option<Value>>;

    async fn create_geofence(&self, device: &str, lat: f64, lng: f64) -> crate::Result<()>;

    async fn update_radius(&self, device: &str, radius: f64) -> crate::Result<()>;

    async fn delete_geofence(&self, device: &str) -> crate::Result<()>;

    /// Devices registered to the authenticated customer
    async fn list_devices(&self) -> crate::Result<Vec<Device>>;

    async fn delete_device(&self, device: &str) -> crate::Result<()>;

    async fn register_device(&self, registration: &Registration) -> crate::Result<()>;
}

#[derive(Debug, Deserialize)]
struct RegisteredDevices {
    #[serde(default)]
    devices: Vec<RegisteredDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredDevice {
    device_name: String,
    #[serde(default)]
    nickname: Option<String>,
}

/// Polling endpoint over the backend's HTTP API
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &ApiConfig, http: Arc<dyn HttpClient>) -> Self {
        tracing::debug!("Created ApiClient at {}", config.base_url);
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http,
        }
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment
    fn url(&self, segments: &[&str]) -> crate::Result<String> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            crate::TrackerError::Config(format!("Invalid API base URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                crate::TrackerError::Config(format!(
                    "API base URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// A read where 404, an empty or `null` body, or a body that is not JSON
    /// means "no data"
    async fn read(&self, segments: &[&str]) -> crate::Result<Option<Value>> {
        let path = segments.join("/");
        let response = self.http.get(&self.url(segments)?, self.bearer()).await?;
        if response.status == 404 {
            tracing::debug!("GET {} -> no data", path);
            return Ok(None);
        }
        check("GET", &path, &response)?;
        if response.body.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(&response.body) {
            Ok(value) => Ok((!value.is_null()).then_some(value)),
            Err(e) => {
                tracing::debug!("GET {} -> body is not JSON ({}), no data", path, e);
                Ok(None)
            }
        }
    }
}

fn check(method: &str, path: &str, response: &HttpResponse) -> crate::Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(crate::TrackerError::Api(format!(
            "{} {} returned status {}: {}",
            method, path, response.status, response.body
        )))
    }
}

#[async_trait]
impl PollingEndpoint for ApiClient {
    async fn location(&self, device: &str) -> crate::Result<Option<Value>> {
        self.read(&["realtime", device]).await
    }

    async fn geofence(&self, device: &str) -> crate::Result<Option<Value>> {
        self.read(&["geofencing", device]).await
    }

    async fn create_geofence(&self, device: &str, lat: f64, lng: f64) -> crate::Result<()> {
        let path = "device/geofencing";
        let body = json!({
            "deviceName": device,
            "latitude": lat,
            "longitude": lng,
        });
        let response = self
            .http
            .post_json(&self.url(&["device", "geofencing"])?, &body, self.bearer())
            .await?;
        check("POST", path, &response)
    }

    async fn update_radius(&self, device: &str, radius: f64) -> crate::Result<()> {
        let radius = radius.to_string();
        let path = format!("geofencing/{}/{}", device, radius);
        let url = self.url(&["geofencing", device, radius.as_str()])?;
        let response = self.http.put_json(&url, &Value::Null, self.bearer()).await?;
        check("PUT", &path, &response)
    }

    async fn delete_geofence(&self, device: &str) -> crate::Result<()> {
        let path = format!("geofencing/{}", device);
        let body = json!({ "deviceName": device });
        let url = self.url(&["geofencing", device])?;
        let response = self.http.delete(&url, Some(&body), self.bearer()).await?;
        check("DELETE", &path, &response)
    }

    async fn list_devices(&self) -> crate::Result<Vec<Device>> {
        let Some(value) = self.read(&["device", "registered"]).await? else {
            return Ok(Vec::new());
        };
        let registered: RegisteredDevices = serde_json::from_value(value)?;
        Ok(registered
            .devices
            .into_iter()
            .map(|d| Device::new(d.device_name, d.nickname))
            .collect())
    }

    async fn delete_device(&self, device: &str) -> crate::Result<()> {
        let path = format!("device/{}", device);
        let url = self.url(&["device", device])?;
        let response = self.http.delete(&url, None, self.bearer()).await?;
        check("DELETE", &path, &response)
    }

    async fn register_device(&self, registration: &Registration) -> crate::Result<()> {
        let path = "device/register";
        let body = serde_json::to_value(registration)?;
        let response = self
            .http
            .post_json(&self.url(&["device", "register"])?, &body, self.bearer())
            .await?;
        check("POST", path, &response)
    }
}
