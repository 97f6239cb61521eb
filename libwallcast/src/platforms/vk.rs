//! VK platform implementation
//!
//! Reads community walls through the VK API (`wall.get`). Only a single page
//! of at most 100 posts is ever requested.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{RelayConfig, VkConfig, MAX_FETCH_COUNT};
use crate::error::{PlatformError, Result};
use crate::platforms::FeedSource;
use crate::types::WallPost;

/// Envelope every VK API method answers with
#[derive(Debug, Deserialize)]
struct VkEnvelope<T> {
    response: Option<T>,
    error: Option<VkApiError>,
}

#[derive(Debug, Deserialize)]
struct VkApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct WallGetResponse {
    #[serde(default)]
    items: Vec<WallPost>,
}

/// Map a VK error object to a PlatformError
///
/// Codes: 5/27/28 are token problems, 6/9/29 are throttling.
fn map_vk_error(error: VkApiError, method: &str) -> PlatformError {
    let message = format!(
        "VK {} failed with error {}: {}",
        method, error.error_code, error.error_msg
    );

    match error.error_code {
        5 | 27 | 28 => PlatformError::Authentication(message),
        6 | 9 | 29 => PlatformError::RateLimit(message),
        _ => PlatformError::Api(message),
    }
}

/// The token travels in the query string, so the URL is stripped from transport errors
fn map_transport_error(error: reqwest::Error, method: &str) -> PlatformError {
    let error = error.without_url();
    if error.is_timeout() {
        PlatformError::Network(format!("VK {} timed out: {}", method, error))
    } else {
        PlatformError::Network(format!("VK {} request failed: {}", method, error))
    }
}

/// VK API client bound to one community
#[derive(Debug)]
pub struct VkClient {
    client: reqwest::Client,
    api_url: String,
    api_version: String,
    group_id: i64,
    access_token: SecretString,
}

impl VkClient {
    /// Create a client for the community `group_id` (positive id)
    pub fn new(
        api_url: String,
        api_version: String,
        group_id: i64,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_version,
            group_id: group_id.abs(),
            access_token: SecretString::from(access_token),
        })
    }

    pub fn from_config(config: &VkConfig, relay: &RelayConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.api_version.clone(),
            config.group_id()?,
            config.access_token.clone(),
            Duration::from_secs(relay.http_timeout),
        )
    }

    /// Owner id of the community wall; VK uses negative ids for communities
    pub fn owner_id(&self) -> i64 {
        -self.group_id
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/method/{}", self.api_url, method);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[
                ("access_token", self.access_token.expose_secret()),
                ("v", self.api_version.as_str()),
            ])
            .send()
            .await
            .map_err(|e| map_transport_error(e, method))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, method))?;

        if !status.is_success() {
            return Err(PlatformError::Api(format!("VK {} returned HTTP {}", method, status)).into());
        }

        let envelope: VkEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            PlatformError::Api(format!("Unexpected VK response to {}: {}", method, e))
        })?;

        match envelope {
            VkEnvelope {
                error: Some(error), ..
            } => Err(map_vk_error(error, method).into()),
            VkEnvelope {
                response: Some(response),
                ..
            } => Ok(response),
            _ => Err(PlatformError::Api(format!("VK {} returned an empty response", method)).into()),
        }
    }
}

#[async_trait]
impl FeedSource for VkClient {
    async fn authenticate(&self) -> Result<()> {
        self.call::<serde_json::Value>("groups.getById", &[("group_id", self.group_id.to_string())])
            .await?;

        tracing::debug!("VK token accepted for group {}", self.group_id);
        Ok(())
    }

    async fn fetch_recent(&self, limit: u32) -> Result<Vec<WallPost>> {
        let count = limit.min(MAX_FETCH_COUNT);

        let page: WallGetResponse = self
            .call(
                "wall.get",
                &[
                    ("owner_id", self.owner_id().to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        tracing::debug!(
            "Fetched {} post(s) from wall {}",
            page.items.len(),
            self.owner_id()
        );

        Ok(page.items)
    }

    fn name(&self) -> &str {
        "vk"
    }
}
