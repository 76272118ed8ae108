use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{BridgeError, Result};

use super::types::*;

/// Seam the provisioner talks to the network-management inventory through.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Declare a CPE to the NMS so it shows up in monitoring.
    async fn register_blackbox(&self, device: &BlackboxConfig) -> Result<()>;

    /// Devices the NMS currently knows about.
    async fn list_devices(&self) -> Result<Vec<NmsDevice>>;
}

/// UNMS REST API client
pub struct UnmsClient {
    base_url: String,
    token: String,
    client: Client,
}

impl UnmsClient {
    pub fn new(url: String, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::remote("build HTTP client", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl InventoryApi for UnmsClient {
    async fn register_blackbox(&self, device: &BlackboxConfig) -> Result<()> {
        let url = self.api_url("/devices/blackboxes/config");
        let request = || {
            self.client
                .post(&url)
                .header("x-auth-token", &self.token)
                .json(device)
                .send()
        };

        let resp = match request().await {
            Ok(resp) => resp,
            Err(first) => {
                tracing::warn!("NMS registration failed, retrying once: {}", first);
                request().await?
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RemoteCall(format!(
                "NMS API error {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<NmsDevice>> {
        let resp = self
            .client
            .get(self.api_url("/devices"))
            .header("x-auth-token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RemoteCall(format!(
                "NMS API error {}: {}",
                status, body
            )));
        }

        Ok(resp.json().await?)
    }
}
