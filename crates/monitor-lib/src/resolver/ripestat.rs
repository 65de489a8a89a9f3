//! RIPEstat `network-info` lookups

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use super::AsResolver;
use crate::error::TransportError;
use crate::models::AsNumber;

pub const DEFAULT_RIPESTAT_URL: &str = "https://stat.ripe.net";

#[derive(Debug, Deserialize)]
struct NetworkInfoResponse {
    data: NetworkInfoData,
}

#[derive(Debug, Deserialize)]
struct NetworkInfoData {
    #[serde(default)]
    asns: Vec<String>,
}

/// Resolver backed by the RIPEstat data API
pub struct RipeStatResolver {
    client: reqwest::Client,
    base_url: String,
}

impl RipeStatResolver {
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
impl AsResolver for RipeStatResolver {
    async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, TransportError> {
        if ip.parse::<IpAddr>().is_err() {
            return Ok(None);
        }

        let url = format!("{}/data/network-info/data.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("resource", ip)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "network-info returned {}",
                response.status()
            )));
        }

        let body: NetworkInfoResponse = response.json().await?;
        let asn = body.data.asns.first().and_then(|s| s.parse::<AsNumber>().ok());
        debug!(ip = %ip, asn = ?asn, "Resolved AS via RIPEstat");
        Ok(asn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_network_info_lookup() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data/network-info/data.json")
            .match_query(mockito::Matcher::UrlEncoded(
                "resource".into(),
                "193.0.14.129".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"ok","data":{"asns":["25152"],"prefix":"193.0.14.0/23"}}"#)
            .create_async()
            .await;

        let resolver = RipeStatResolver::new(server.url(), Duration::from_secs(2)).unwrap();
        assert_eq!(resolver.lookup("193.0.14.129").await, Ok(Some(25152)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unannounced_prefix_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/data/network-info/data.json")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{"asns":[],"prefix":null}}"#)
            .create_async()
            .await;

        let resolver = RipeStatResolver::new(server.url(), Duration::from_secs(2)).unwrap();
        assert_eq!(resolver.lookup("10.0.0.1").await, Ok(None));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/data/network-info/data.json")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let resolver = RipeStatResolver::new(server.url(), Duration::from_secs(2)).unwrap();
        assert!(resolver.lookup("193.0.14.129").await.is_err());
        assert_eq!(resolver.resolve("193.0.14.129").await, None);
    }

    #[tokio::test]
    async fn test_non_ip_skips_request() {
        let resolver = RipeStatResolver::new("http://127.0.0.1:1", Duration::from_millis(100)).unwrap();
        assert_eq!(resolver.lookup("*").await, Ok(None));
    }
}
