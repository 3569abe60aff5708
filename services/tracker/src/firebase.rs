//! Firebase Realtime Database client over its REST and streaming protocol

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RealtimeConfig;
use crate::io::{EventStream, HttpClient, HttpResponse};
use crate::realtime::{RealtimeChannel, Subscription};

const SUBSCRIPTION_BUFFER: usize = 16;

/// Body of `put` and `patch` stream events
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Realtime channel backed by a Firebase Realtime Database
pub struct FirebaseChannel {
    base_url: String,
    auth_token: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for FirebaseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseChannel")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl FirebaseChannel {
    pub fn new(config: &RealtimeConfig, http: Arc<dyn HttpClient>) -> Self {
        tracing::debug!("Created FirebaseChannel at {}", config.base_url);
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(token);
        }
        url
    }

    fn check(&self, method: &str, path: &str, response: &HttpResponse) -> crate::Result<()> {
        if response.is_success() {
            Ok(())
        } else {
            Err(crate::TrackerError::Realtime(format!(
                "{} {} returned status {}: {}",
                method, path, response.status, response.body
            )))
        }
    }
}

#[async_trait]
impl RealtimeChannel for FirebaseChannel {
    async fn read(&self, path: &str) -> crate::Result<Option<Value>> {
        let response = self.http.get(&self.url(path), None).await?;
        if response.status == 404 {
            return Ok(None);
        }
        self.check("GET", path, &response)?;
        let value: Value = serde_json::from_str(&response.body)?;
        Ok(non_null(value))
    }

    async fn write(&self, path: &str, value: &Value) -> crate::Result<()> {
        let response = self.http.put_json(&self.url(path), value, None).await?;
        self.check("PUT", path, &response)
    }

    async fn delete(&self, path: &str) -> crate::Result<()> {
        let response = self.http.delete(&self.url(path), None, None).await?;
        self.check("DELETE", path, &response)
    }

    async fn subscribe(&self, path: &str) -> crate::Result<Subscription> {
        let events = self.http.event_stream(&self.url(path)).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();

        tokio::spawn(pump_events(path.to_string(), events, tx, cancel.clone()));

        tracing::debug!("Subscribed to {}", path);
        Ok(Subscription::new(path, rx, cancel))
    }
}

/// Fold stream events into a local copy of the subscribed path and forward
/// the whole value after every change
async fn pump_events(
    path: String,
    mut events: EventStream,
    tx: mpsc::Sender<Option<Value>>,
    cancel: CancellationToken,
) {
    let mut snapshot = Value::Null;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => event,
        };

        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                tracing::warn!("Subscription to {} failed: {}", path, e);
                break;
            }
            None => {
                tracing::debug!("Subscription stream for {} ended", path);
                break;
            }
        };

        match event.event.as_str() {
            "put" | "patch" => {
                let payload: StreamPayload = match serde_json::from_str(&event.data) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::debug!("Malformed {} event on {}: {}", event.event, path, e);
                        continue;
                    }
                };
                apply_event(
                    &mut snapshot,
                    &payload.path,
                    payload.data,
                    event.event == "patch",
                );
                if tx.send(non_null(snapshot.clone())).await.is_err() {
                    break;
                }
            }
            "keep-alive" => {}
            "cancel" | "auth_revoked" => {
                tracing::warn!("Subscription to {} closed by server: {}", path, event.event);
                break;
            }
            other => tracing::debug!("Ignoring '{}' event on {}", other, path),
        }
    }

    tracing::debug!("Unsubscribed from {}", path);
}

/// Apply a `put` (replace) or `patch` (merge children) at `path`, relative
/// to the subscribed location
pub fn apply_event(snapshot: &mut Value, path: &str, data: Value, merge: bool) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let target = descend(snapshot, &segments);

    if !merge {
        *target = data;
        return;
    }

    let Value::Object(updates) = data else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(children) = target {
        for (key, value) in updates {
            if value.is_null() {
                children.remove(&key);
            } else {
                children.insert(key, value);
            }
        }
    }
}

fn descend<'a>(value: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut current = value;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(children) => children
                .entry((*segment).to_string())
                .or_insert(Value::Null),
            other => other,
        };
    }
    current
}

fn non_null(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MockHttpClient, StreamEvent};
    use serde_json::json;

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            base_url: "https://tracker.firebaseio.com/".to_string(),
            auth_token: None,
            auth_token_env: None,
        }
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    fn event(kind: &str, data: &str) -> crate::Result<StreamEvent> {
        Ok(StreamEvent {
            event: kind.to_string(),
            data: data.to_string(),
        })
    }

    #[test]
    fn urls_end_in_json_and_carry_auth() {
        let mut config = test_config();
        let channel = FirebaseChannel::new(&config, Arc::new(MockHttpClient::new()));
        assert_eq!(
            channel.url("trk-1/Realtime"),
            "https://tracker.firebaseio.com/trk-1/Realtime.json"
        );

        config.auth_token = Some("secret".to_string());
        let channel = FirebaseChannel::new(&config, Arc::new(MockHttpClient::new()));
        assert_eq!(
            channel.url("/trk-1/"),
            "https://tracker.firebaseio.com/trk-1.json?auth=secret"
        );
    }

    #[tokio::test]
    async fn read_returns_value() {
        let mut mock = MockHttpClient::new();
        mock.expect_get()
            .withf(|url, bearer| url.ends_with("/trk-1/Realtime.json") && bearer.is_none())
            .returning(|_, _| {
                Box::pin(async { Ok(ok(r#"{"timestamp": "2025-03-13,14:30:00,12.97,77.59"}"#)) })
            });

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        let value = channel.read("trk-1/Realtime").await.unwrap().unwrap();
        assert_eq!(value["timestamp"], "2025-03-13,14:30:00,12.97,77.59");
    }

    #[tokio::test]
    async fn read_null_is_absent() {
        let mut mock = MockHttpClient::new();
        mock.expect_get()
            .returning(|_, _| Box::pin(async { Ok(ok("null")) }));

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        assert!(channel.read("trk-1/Realtime").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_error_status_is_error() {
        let mut mock = MockHttpClient::new();
        mock.expect_get().returning(|_, _| {
            Box::pin(async {
                Ok(HttpResponse {
                    status: 401,
                    body: r#"{"error": "Permission denied"}"#.to_string(),
                })
            })
        });

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        let err = channel.read("trk-1/Realtime").await.unwrap_err();
        assert!(matches!(err, crate::TrackerError::Realtime(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn write_puts_json() {
        let mut mock = MockHttpClient::new();
        mock.expect_put_json()
            .withf(|url, body, _| {
                url.ends_with("/trk-1/geofencing/radius.json") && *body == json!(3)
            })
            .returning(|_, _, _| Box::pin(async { Ok(ok("3")) }));

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        channel
            .write("trk-1/geofencing/radius", &json!(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_failure_is_error() {
        let mut mock = MockHttpClient::new();
        mock.expect_delete().returning(|_, _, _| {
            Box::pin(async { Err(crate::TrackerError::Http("connection reset".to_string())) })
        });

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        let err = channel.delete("trk-1").await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn subscription_folds_put_and_patch_events() {
        let mut mock = MockHttpClient::new();
        mock.expect_event_stream().returning(|_| {
            Box::pin(async {
                let events = futures_util::stream::iter(vec![
                    event("put", r#"{"path": "/", "data": {"lat": 1.0, "lng": 2.0}}"#),
                    event("keep-alive", "null"),
                    event("patch", r#"{"path": "/", "data": {"radius": 4}}"#),
                    event("put", r#"{"path": "/lat", "data": 1.5}"#),
                ]);
                Ok(events.boxed())
            })
        });

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        let mut subscription = channel.subscribe("trk-1/geofencing").await.unwrap();
        assert_eq!(subscription.path(), "trk-1/geofencing");

        let first = subscription.next().await.unwrap().unwrap();
        assert_eq!(first, json!({"lat": 1.0, "lng": 2.0}));
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(second, json!({"lat": 1.0, "lng": 2.0, "radius": 4}));
        let third = subscription.next().await.unwrap().unwrap();
        assert_eq!(third["lat"], 1.5);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn subscription_ends_on_cancel_event() {
        let mut mock = MockHttpClient::new();
        mock.expect_event_stream().returning(|_| {
            Box::pin(async {
                let events = futures_util::stream::iter(vec![
                    event("put", r#"{"path": "/", "data": null}"#),
                    event("cancel", "null"),
                    event("put", r#"{"path": "/", "data": {"timestamp": "late"}}"#),
                ]);
                Ok(events.boxed())
            })
        });

        let channel = FirebaseChannel::new(&test_config(), Arc::new(mock));
        let mut subscription = channel.subscribe("trk-1/Realtime").await.unwrap();
        assert_eq!(subscription.next().await, Some(None));
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn put_replaces_nested_value() {
        let mut snapshot = json!({"lat": 1.0, "lng": 2.0, "radius": 1});
        apply_event(&mut snapshot, "/radius", json!(5), false);
        assert_eq!(snapshot, json!({"lat": 1.0, "lng": 2.0, "radius": 5}));

        apply_event(&mut snapshot, "/", json!({"lat": 3.0}), false);
        assert_eq!(snapshot, json!({"lat": 3.0}));
    }

    #[test]
    fn put_creates_missing_parents() {
        let mut snapshot = Value::Null;
        apply_event(&mut snapshot, "/geofencing/radius", json!(2), false);
        assert_eq!(snapshot, json!({"geofencing": {"radius": 2}}));
    }

    #[test]
    fn put_below_scalar_replaces_it() {
        let mut snapshot = json!({"Realtime": "stale"});
        apply_event(&mut snapshot, "/Realtime/timestamp", json!("t"), false);
        assert_eq!(snapshot, json!({"Realtime": {"timestamp": "t"}}));
    }

    #[test]
    fn patch_merges_and_removes_children() {
        let mut snapshot = json!({"lat": 1.0, "lng": 2.0, "battery": 50});
        apply_event(
            &mut snapshot,
            "/",
            json!({"battery": null, "radius": 3}),
            true,
        );
        assert_eq!(snapshot, json!({"lat": 1.0, "lng": 2.0, "radius": 3}));
    }
}
