//! In-memory fakes for the provisioner seams. They share one call
//! journal so tests can assert cross-collaborator ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::models::PppSecret;
use crate::routeros::{RouterSession, RouterTarget};
use crate::ucrm::{AttributePatch, CrmApi, CrmClient, CrmService};
use crate::unms::{BlackboxConfig, InventoryApi, NmsDevice};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

pub fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Index of the first journal entry starting with `prefix`, if any.
pub fn position_of(journal: &Journal, prefix: &str) -> Option<usize> {
    journal
        .lock()
        .unwrap()
        .iter()
        .position(|e| e.starts_with(prefix))
}

pub fn test_config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        router_host: "router.test".to_string(),
        router_port: 8728,
        router_user: "api".to_string(),
        router_pass: "secret".to_string(),
        crm_url: "https://crm.test".to_string(),
        crm_app_key: "key".to_string(),
        nms_url: "https://nms.test/v2.1".to_string(),
        nms_token: "token".to_string(),
        ip_ranges: "10.0.4.0/29".to_string(),
        secret_prefix: "07NAV".to_string(),
        suspend_address: "1.1.1.1".to_string(),
        site_id: "site-1".to_string(),
        attr_service_ip: 1,
        attr_username: 2,
        attr_password: 3,
        attr_address: 4,
        call_timeout_secs: 10,
    }
}

// --- Router fake ---

pub struct FakeRouter {
    pub secrets: Arc<Mutex<Vec<PppSecret>>>,
    pub journal: Journal,
    next_id: Arc<AtomicU64>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            secrets: Arc::new(Mutex::new(Vec::new())),
            journal,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn seed_secret(&self, name: &str, remote_address: &str, comment: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.secrets.lock().unwrap().push(PppSecret {
            id: Some(format!("*{}", id)),
            name: name.to_string(),
            password: Some("seeded".to_string()),
            remote_address: Some(remote_address.to_string()),
            service: "pppoe".to_string(),
            comment: if comment.is_empty() {
                None
            } else {
                Some(comment.to_string())
            },
        });
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.secrets
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }
}

#[async_trait]
impl RouterTarget for FakeRouter {
    async fn open(&self) -> Result<Box<dyn RouterSession>> {
        record(&self.journal, "router.open".to_string());
        Ok(Box::new(FakeSession {
            secrets: self.secrets.clone(),
            journal: self.journal.clone(),
            next_id: self.next_id.clone(),
        }))
    }
}

pub struct FakeSession {
    secrets: Arc<Mutex<Vec<PppSecret>>>,
    journal: Journal,
    next_id: Arc<AtomicU64>,
}

#[async_trait]
impl RouterSession for FakeSession {
    async fn list_secrets(&self) -> Result<Vec<PppSecret>> {
        record(&self.journal, "router.list".to_string());
        Ok(self.secrets.lock().unwrap().clone())
    }

    async fn find_secrets(&self, name: &str) -> Result<Vec<PppSecret>> {
        record(&self.journal, format!("router.find {}", name));
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect())
    }

    async fn add_secret(&self, secret: &PppSecret) -> Result<()> {
        record(&self.journal, format!("router.add_secret {}", secret.name));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = secret.clone();
        stored.id = Some(format!("*{}", id));
        self.secrets.lock().unwrap().push(stored);
        Ok(())
    }

    async fn set_remote_address(&self, id: &str, address: &str) -> Result<()> {
        record(
            &self.journal,
            format!("router.set_remote {} {}", id, address),
        );
        let mut secrets = self.secrets.lock().unwrap();
        match secrets.iter_mut().find(|s| s.id.as_deref() == Some(id)) {
            Some(secret) => {
                secret.remote_address = Some(address.to_string());
                Ok(())
            }
            None => Err(BridgeError::RemoteCall(format!("no such item {}", id))),
        }
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        record(&self.journal, format!("router.remove_secret {}", id));
        self.secrets
            .lock()
            .unwrap()
            .retain(|s| s.id.as_deref() != Some(id));
        Ok(())
    }

    async fn remove_active(&self, name: &str) -> Result<()> {
        record(&self.journal, format!("router.remove_active {}", name));
        Ok(())
    }
}

// --- CRM fake ---

pub struct FakeCrm {
    pub clients: HashMap<i64, CrmClient>,
    pub services: HashMap<i64, CrmService>,
    pub journal: Journal,
}

impl FakeCrm {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            clients: HashMap::new(),
            services: HashMap::new(),
            journal,
        }
    }

    pub fn add_client(&mut self, id: i64, full_address: &str, attributes: Vec<(i64, &str)>) {
        self.clients.insert(
            id,
            serde_json::from_value(serde_json::json!({
                "id": id,
                "firstName": "Test",
                "lastName": format!("Client{}", id),
                "fullAddress": full_address,
                "attributes": attributes
                    .iter()
                    .map(|(attr_id, value)| serde_json::json!({
                        "customAttributeId": attr_id,
                        "value": value,
                    }))
                    .collect::<Vec<_>>(),
            }))
            .unwrap(),
        );
    }

    pub fn add_service(
        &mut self,
        id: i64,
        client_id: i64,
        plan: &str,
        attributes: Vec<(i64, &str)>,
    ) {
        self.services.insert(
            id,
            serde_json::from_value(serde_json::json!({
                "id": id,
                "clientId": client_id,
                "servicePlanName": plan,
                "attributes": attributes
                    .iter()
                    .map(|(attr_id, value)| serde_json::json!({
                        "customAttributeId": attr_id,
                        "value": value,
                    }))
                    .collect::<Vec<_>>(),
            }))
            .unwrap(),
        );
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn get_client(&self, id: i64) -> Result<CrmClient> {
        record(&self.journal, format!("crm.get_client {}", id));
        self.clients
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("client {}", id)))
    }

    async fn get_service(&self, id: i64) -> Result<CrmService> {
        record(&self.journal, format!("crm.get_service {}", id));
        self.services
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("service {}", id)))
    }

    async fn patch_client_attributes(
        &self,
        id: i64,
        attributes: Vec<AttributePatch>,
    ) -> Result<()> {
        record(
            &self.journal,
            format!("crm.patch_client {} ({} attrs)", id, attributes.len()),
        );
        Ok(())
    }

    async fn patch_service_attributes(
        &self,
        id: i64,
        attributes: Vec<AttributePatch>,
    ) -> Result<()> {
        record(
            &self.journal,
            format!("crm.patch_service {} ({} attrs)", id, attributes.len()),
        );
        Ok(())
    }
}

// --- Inventory fake ---

pub struct FakeInventory {
    pub journal: Journal,
    pub fail_register: bool,
}

impl FakeInventory {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            fail_register: false,
        }
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    async fn register_blackbox(&self, device: &BlackboxConfig) -> Result<()> {
        if self.fail_register {
            record(&self.journal, "nms.register failed".to_string());
            return Err(BridgeError::RemoteCall("NMS API error 500".to_string()));
        }
        record(&self.journal, format!("nms.register {}", device.hostname));
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<NmsDevice>> {
        record(&self.journal, "nms.list".to_string());
        Ok(Vec::new())
    }
}
