//! API client for the edge monitor control API

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the monitor daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.client.get(self.url(path)?)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// GET that also accepts 503, for health endpoints that report failure in the body
    pub async fn get_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({})", status);
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(self.client.post(self.url(path)?).json(body)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// POST without a body, parsing the JSON response
    pub async fn trigger<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.client.post(self.url(path)?)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// POST without a body to an endpoint that answers with no content
    pub async fn post_empty(&self, path: &str) -> Result<StatusCode> {
        let response = self.send(self.client.post(self.url(path)?)).await?;
        Ok(response.status())
    }

    pub async fn delete(&self, path: &str) -> Result<StatusCode> {
        let response = self.send(self.client.delete(self.url(path)?)).await?;
        Ok(response.status())
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementInfo {
    pub id: u64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub measurement: MeasurementInfo,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorList {
    pub stream: String,
    pub monitors: Vec<MonitorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitorRequest {
    pub measurement_id: u64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitorResponse {
    pub measurement_id: u64,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateRequest {
    pub measurements: Vec<CreateMonitorRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateResponse {
    pub created: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertInfo {
    pub measurement_id: u64,
    pub as_number: u32,
    pub bucket_start: String,
    pub score: f64,
    pub notify: bool,
    pub flagged_probes: u32,
    pub distinct_probes: u32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub measurement_id: u64,
    pub alerts: Vec<AlertInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub components: BTreeMap<String, ComponentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
