//! Transient user-facing notifications

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Success => write!(f, "success"),
            Severity::Info => write!(f, "info"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A notification to be shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// Device the notification concerns, if any
    pub device: Option<String>,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Error, message)
    }

    pub fn for_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    fn with_severity(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            device: None,
        }
    }
}

/// Record of a raised notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub device: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub timestamp_epoch_ms: u64,
}

impl NotificationRecord {
    pub fn new(notification: &Notification, timestamp_epoch_ms: u64) -> Self {
        Self {
            device: notification.device.clone(),
            severity: notification.severity,
            message: notification.message.clone(),
            timestamp_epoch_ms,
        }
    }
}

/// Trait for delivering notifications
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Get the notifier type name (e.g. "log")
    fn type_name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> crate::Result<()>;
}

/// Writes notifications to the service log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn type_name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> crate::Result<()> {
        let device = notification.device.as_deref().unwrap_or("-");
        match notification.severity {
            Severity::Error => tracing::warn!("[{}] {}", device, notification.message),
            Severity::Success | Severity::Info => {
                tracing::info!("[{}] {}", device, notification.message)
            }
        }
        Ok(())
    }
}
