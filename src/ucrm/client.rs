use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{BridgeError, Result};

use super::types::*;

/// Seam the provisioner talks to the CRM through.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn get_client(&self, id: i64) -> Result<CrmClient>;
    async fn get_service(&self, id: i64) -> Result<CrmService>;
    async fn patch_client_attributes(&self, id: i64, attributes: Vec<AttributePatch>) -> Result<()>;
    async fn patch_service_attributes(&self, id: i64, attributes: Vec<AttributePatch>)
        -> Result<()>;
}

/// UCRM REST API client
pub struct UcrmClient {
    base_url: String,
    app_key: String,
    client: Client,
}

impl UcrmClient {
    pub fn new(url: String, app_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::remote("build HTTP client", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            app_key,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1.0{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = self.api_url(path);
        let request = || {
            self.client
                .get(&url)
                .header("X-Auth-App-Key", &self.app_key)
                .header("Accept", "application/json")
                .send()
        };

        // one retry on a transport-level failure, never on an HTTP status
        let resp = match request().await {
            Ok(resp) => resp,
            Err(first) => {
                tracing::warn!("CRM GET {} failed, retrying once: {}", path, first);
                request().await?
            }
        };

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BridgeError::NotFound(what.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RemoteCall(format!(
                "CRM API error {}: {}",
                status, body
            )));
        }

        Ok(resp.json().await?)
    }

    async fn patch_attributes(&self, path: &str, attributes: Vec<AttributePatch>) -> Result<()> {
        let url = self.api_url(path);
        let payload = AttributesPayload { attributes };
        let request = || {
            self.client
                .patch(&url)
                .header("X-Auth-App-Key", &self.app_key)
                .json(&payload)
                .send()
        };

        let resp = match request().await {
            Ok(resp) => resp,
            Err(first) => {
                tracing::warn!("CRM PATCH {} failed, retrying once: {}", path, first);
                request().await?
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RemoteCall(format!(
                "CRM API patch error {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CrmApi for UcrmClient {
    async fn get_client(&self, id: i64) -> Result<CrmClient> {
        self.get_json(&format!("/clients/{}", id), &format!("client {}", id))
            .await
    }

    async fn get_service(&self, id: i64) -> Result<CrmService> {
        self.get_json(
            &format!("/clients/services/{}", id),
            &format!("service {}", id),
        )
        .await
    }

    async fn patch_client_attributes(&self, id: i64, attributes: Vec<AttributePatch>) -> Result<()> {
        self.patch_attributes(&format!("/clients/{}", id), attributes)
            .await
    }

    async fn patch_service_attributes(
        &self,
        id: i64,
        attributes: Vec<AttributePatch>,
    ) -> Result<()> {
        self.patch_attributes(&format!("/clients/services/{}", id), attributes)
            .await
    }
}
