use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BridgeError, Result};
use crate::models::PppSecret;

use super::client::ApiClient;

/// A router that can hand out short-lived API sessions.
#[async_trait]
pub trait RouterTarget: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RouterSession>>;
}

/// One open session against the router's PPP tables. Sessions are opened
/// per dispatch, used for a short burst of commands, and dropped.
#[async_trait]
pub trait RouterSession: Send + Sync {
    /// All secrets currently on the router.
    async fn list_secrets(&self) -> Result<Vec<PppSecret>>;

    /// Secrets whose name matches exactly.
    async fn find_secrets(&self, name: &str) -> Result<Vec<PppSecret>>;

    async fn add_secret(&self, secret: &PppSecret) -> Result<()>;

    async fn set_remote_address(&self, id: &str, address: &str) -> Result<()>;

    async fn remove_secret(&self, id: &str) -> Result<()>;

    /// Drop the active PPP connection for `name`, if any. Absence is not
    /// an error.
    async fn remove_active(&self, name: &str) -> Result<()>;
}

/// Connection parameters for one MikroTik router.
#[derive(Debug, Clone)]
pub struct Mikrotik {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub timeout: Duration,
}

#[async_trait]
impl RouterTarget for Mikrotik {
    async fn open(&self) -> Result<Box<dyn RouterSession>> {
        let target = self.clone();
        let client = tokio::task::spawn_blocking(move || {
            // one retry on a transient connect failure
            ApiClient::connect(&target.host, target.port, &target.user, &target.pass, target.timeout)
                .or_else(|first| {
                    tracing::warn!("Router connect failed, retrying once: {}", first);
                    ApiClient::connect(
                        &target.host,
                        target.port,
                        &target.user,
                        &target.pass,
                        target.timeout,
                    )
                })
        })
        .await
        .map_err(|e| BridgeError::remote("router connect task", e))??;

        Ok(Box::new(MikrotikSession {
            client: Arc::new(Mutex::new(client)),
        }))
    }
}

/// Live session backed by the blocking [`ApiClient`]. Every operation
/// hops to the blocking pool, the same way the rest of the service
/// drives blocking channels.
struct MikrotikSession {
    client: Arc<Mutex<ApiClient>>,
}

impl MikrotikSession {
    async fn run(
        &self,
        command: &'static str,
        attributes: Vec<(String, String)>,
        queries: Vec<(String, String)>,
    ) -> Result<Vec<HashMap<String, String>>> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = client
                .lock()
                .map_err(|_| BridgeError::RemoteCall("router session poisoned".to_string()))?;
            let attrs: Vec<(&str, &str)> = attributes
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let quers: Vec<(&str, &str)> = queries
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            client.run(command, &attrs, &quers)
        })
        .await
        .map_err(|e| BridgeError::remote(command, e))?
    }
}

fn secret_from_row(row: HashMap<String, String>) -> PppSecret {
    PppSecret {
        id: row.get(".id").cloned(),
        name: row.get("name").cloned().unwrap_or_default(),
        password: row.get("password").cloned(),
        remote_address: row.get("remote-address").cloned(),
        service: row.get("service").cloned().unwrap_or_default(),
        comment: row.get("comment").cloned(),
    }
}

#[async_trait]
impl RouterSession for MikrotikSession {
    async fn list_secrets(&self) -> Result<Vec<PppSecret>> {
        let rows = self.run("/ppp/secret/getall", vec![], vec![]).await?;
        Ok(rows.into_iter().map(secret_from_row).collect())
    }

    async fn find_secrets(&self, name: &str) -> Result<Vec<PppSecret>> {
        let rows = self
            .run(
                "/ppp/secret/getall",
                vec![],
                vec![("name".to_string(), name.to_string())],
            )
            .await?;
        Ok(rows.into_iter().map(secret_from_row).collect())
    }

    async fn add_secret(&self, secret: &PppSecret) -> Result<()> {
        let mut attributes = vec![
            ("name".to_string(), secret.name.clone()),
            ("service".to_string(), secret.service.clone()),
        ];
        if let Some(password) = &secret.password {
            attributes.push(("password".to_string(), password.clone()));
        }
        if let Some(remote_address) = &secret.remote_address {
            attributes.push(("remote-address".to_string(), remote_address.clone()));
        }
        if let Some(comment) = &secret.comment {
            attributes.push(("comment".to_string(), comment.clone()));
        }
        self.run("/ppp/secret/add", attributes, vec![]).await?;
        Ok(())
    }

    async fn set_remote_address(&self, id: &str, address: &str) -> Result<()> {
        self.run(
            "/ppp/secret/set",
            vec![
                (".id".to_string(), id.to_string()),
                ("remote-address".to_string(), address.to_string()),
            ],
            vec![],
        )
        .await?;
        Ok(())
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        self.run(
            "/ppp/secret/remove",
            vec![(".id".to_string(), id.to_string())],
            vec![],
        )
        .await?;
        Ok(())
    }

    async fn remove_active(&self, name: &str) -> Result<()> {
        let rows = self
            .run(
                "/ppp/active/getall",
                vec![],
                vec![("name".to_string(), name.to_string())],
            )
            .await?;
        for row in rows {
            if let Some(id) = row.get(".id") {
                self.run(
                    "/ppp/active/remove",
                    vec![(".id".to_string(), id.clone())],
                    vec![],
                )
                .await?;
            }
        }
        Ok(())
    }
}
