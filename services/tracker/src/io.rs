//! HTTP client abstraction for testability

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

/// Server-sent events from a long-lived GET
pub type EventStream = BoxStream<'static, crate::Result<StreamEvent>>;

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    /// Send a GET request to the given URL
    async fn get(&self, url: &str, bearer: Option<&str>) -> crate::Result<HttpResponse>;

    /// Send a PUT request with a JSON body
    async fn put_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse>;

    /// Send a POST request with a JSON body
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse>;

    /// Send a DELETE request, optionally with a JSON body
    async fn delete(
        &self,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse>;

    /// Open a `text/event-stream` GET and decode its events
    async fn event_stream(&self, url: &str) -> crate::Result<EventStream>;
}

/// Production HTTP client using reqwest
#[derive(Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        request: reqwest::RequestBuilder,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse> {
        tracing::debug!("{} {}", method, url);
        let request = match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| {
            crate::TrackerError::Http(format!("{} {} failed: {}", method, url, e))
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| crate::TrackerError::Http(format!("Reading response body: {}", e)))?;

        tracing::debug!("{} {} -> {} ({} bytes)", method, url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, bearer: Option<&str>) -> crate::Result<HttpResponse> {
        self.send("GET", url, self.client.get(url), bearer).await
    }

    async fn put_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse> {
        self.send("PUT", url, self.client.put(url).json(body), bearer)
            .await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse> {
        self.send("POST", url, self.client.post(url).json(body), bearer)
            .await
    }

    async fn delete(
        &self,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> crate::Result<HttpResponse> {
        let request = match body {
            Some(body) => self.client.delete(url).json(body),
            None => self.client.delete(url),
        };
        self.send("DELETE", url, request, bearer).await
    }

    async fn event_stream(&self, url: &str) -> crate::Result<EventStream> {
        tracing::debug!("STREAM {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| crate::TrackerError::Http(format!("STREAM {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::TrackerError::Http(format!(
                "STREAM {} returned status {}",
                url,
                status.as_u16()
            )));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => Ok(StreamEvent {
                    event: event.event,
                    data: event.data,
                }),
                Err(e) => Err(crate::TrackerError::Http(format!(
                    "Event stream error: {}",
                    e
                ))),
            });
        Ok(events.boxed())
    }
}
