//! Forwarding to the bedside server

use chrono::Local;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{MeasurementStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body posted to the bedside server's data endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    device_id: &'a str,
    heart_rate: &'a str,
    spo2: &'a str,
    resp: &'a str,
    timestamp: String,
}

/// Posts each measurement as JSON to an HTTP endpoint
///
/// Requests run on a spawned tokio task, so the insert returns as soon as
/// the request is queued. Delivery failures are logged, not returned.
#[derive(Debug, Clone)]
pub struct RemoteForwarder {
    client: reqwest::Client,
    url: String,
    device_id: String,
}

impl RemoteForwarder {
    /// Create a forwarder posting to `url`, tagging records with `device_id`
    pub fn new(url: impl Into<String>, device_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("smmlink/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            device_id: device_id.into(),
        }
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MeasurementStore for RemoteForwarder {
    fn insert_measurement(
        &mut self,
        _patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        let runtime = Handle::try_current()
            .map_err(|_| StoreError::Unavailable("no async runtime to send from".to_string()))?;

        let body = serde_json::to_vec(&Payload {
            device_id: &self.device_id,
            heart_rate,
            spo2,
            resp: resp_rate,
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        })?;

        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let url = self.url.clone();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = url.as_str(), "Measurement forwarded");
                }
                Ok(response) => {
                    warn!(
                        url = url.as_str(),
                        status = %response.status(),
                        "Server rejected measurement"
                    );
                }
                Err(e) => warn!(url = url.as_str(), "Failed to forward measurement: {}", e),
            }
        });
        Ok(())
    }
}
