//! RIPE Atlas REST API client for historical results

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::HistoryClient;
use crate::error::TransportError;
use crate::models::{MeasurementId, RawSample};

pub const DEFAULT_ATLAS_API_URL: &str = "https://atlas.ripe.net";

pub struct AtlasRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl AtlasRestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HistoryClient for AtlasRestClient {
    async fn fetch_results(
        &self,
        measurement_id: MeasurementId,
        start: i64,
        stop: i64,
    ) -> Result<Vec<RawSample>, TransportError> {
        let url = format!(
            "{}/api/v2/measurements/{}/results/",
            self.base_url, measurement_id
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("start", start.to_string()),
                ("stop", stop.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "results for measurement {} returned {}",
                measurement_id,
                response.status()
            )));
        }

        let raw: Vec<Value> = response.json().await?;
        let total = raw.len();
        let samples: Vec<RawSample> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        if samples.len() < total {
            warn!(
                measurement_id,
                skipped = total - samples.len(),
                "Skipped undecodable historical results"
            );
        }
        debug!(measurement_id, count = samples.len(), "Fetched historical results");

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_fetch_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v2/measurements/5001/results/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "1700000000".into()),
                Matcher::UrlEncoded("stop".into(), "1700086400".into()),
                Matcher::UrlEncoded("format".into(), "json".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[
                {"msm_id": 5001, "prb_id": 1, "timestamp": 1700000100, "dst_addr": "193.0.14.129", "result": []},
                {"msm_id": 5001, "prb_id": 2, "timestamp": 1700000200, "dst_addr": "193.0.14.129", "result": []},
                {"garbage": true}
            ]"#,
            )
            .create_async()
            .await;

        let client = AtlasRestClient::new(server.url(), Duration::from_secs(2)).unwrap();
        let samples = client.fetch_results(5001, 1_700_000_000, 1_700_086_400).await.unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].probe_id, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_results_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2/measurements/5001/results/")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = AtlasRestClient::new(server.url(), Duration::from_secs(2)).unwrap();
        let err = client.fetch_results(5001, 0, 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
