//! Device registration request

use serde::{Deserialize, Serialize};

/// A request to attach a physical tracker to the customer's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub device_name: String,
    pub device_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub nickname: String,
}

impl Registration {
    /// Validate and normalize user input.
    ///
    /// Device name, code and nickname are required. The code is often pasted
    /// from a label, so embedded line breaks are dropped.
    pub fn new(
        device_name: &str,
        device_code: &str,
        customer_id: Option<String>,
        nickname: &str,
    ) -> crate::Result<Self> {
        let device_name = required("Device name", device_name)?;
        let device_code: String = device_code
            .chars()
            .filter(|c| *c != '\n' && *c != '\r')
            .collect();
        let device_code = required("Device code", &device_code)?;
        let nickname = required("Nickname", nickname)?;
        let customer_id = customer_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(Self {
            device_name,
            device_code,
            customer_id,
            nickname,
        })
    }

    /// Fill the customer from configuration when the caller did not give one
    pub fn with_default_customer(mut self, customer_id: Option<&str>) -> Self {
        if self.customer_id.is_none() {
            self.customer_id = customer_id.map(str::to_string);
        }
        self
    }
}

fn required(field: &str, value: &str) -> crate::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(crate::TrackerError::Validation(format!(
            "{} is required",
            field
        )))
    } else {
        Ok(trimmed.to_string())
    }
}
