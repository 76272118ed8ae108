pub mod naming;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::ipam::IpPool;
use crate::models::{
    ppp_service, ChangeType, Entity, PppSecret, ProvisionRequest, ServicePlan, WebhookEvent,
};
use crate::routeros::RouterTarget;
use crate::ucrm::{AttributePatch, CrmApi, CrmClient, CrmService};
use crate::unms::{BlackboxConfig, BlackboxInterface, InventoryApi};

/// Outcome of one provisioning step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-dispatch record of which steps ran and how they ended.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub uuid: String,
    pub change_type: String,
    pub steps: Vec<StepOutcome>,
}

impl DispatchReport {
    fn new(event: &WebhookEvent) -> Self {
        Self {
            uuid: event.uuid.clone(),
            change_type: event.change_type.as_str().to_string(),
            steps: Vec::new(),
        }
    }

    fn ok(&mut self, step: &str, detail: Option<String>) {
        tracing::info!("step '{}' succeeded{}", step, fmt_detail(&detail));
        self.steps.push(StepOutcome {
            step: step.to_string(),
            ok: true,
            detail,
        });
    }

    fn fail(&mut self, step: &str, err: &BridgeError) {
        tracing::error!("step '{}' failed: {}", step, err);
        self.steps.push(StepOutcome {
            step: step.to_string(),
            ok: false,
            detail: Some(err.to_string()),
        });
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| !s.ok)
    }
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({})", d),
        None => String::new(),
    }
}

/// Orchestrates one webhook event end to end: CRM lookups, address
/// allocation, inventory registration, router mutation, CRM write-back.
///
/// All router mutation happens under `write_lock`, so concurrent webhook
/// deliveries cannot race the name probe or the address pick against
/// each other.
pub struct Provisioner {
    config: Config,
    pool: IpPool,
    crm: Arc<dyn CrmApi>,
    inventory: Arc<dyn InventoryApi>,
    router: Arc<dyn RouterTarget>,
    write_lock: Mutex<()>,
}

impl Provisioner {
    pub fn new(
        config: Config,
        crm: Arc<dyn CrmApi>,
        inventory: Arc<dyn InventoryApi>,
        router: Arc<dyn RouterTarget>,
    ) -> Result<Self> {
        let pool = IpPool::from_cidr_list(&config.ip_ranges)?;
        Ok(Self {
            config,
            pool,
            crm,
            inventory,
            router,
            write_lock: Mutex::new(()),
        })
    }

    /// Run the state machine for one event. Hard failures abort and
    /// propagate; CRM write-back failures are recorded in the report but
    /// do not undo earlier steps.
    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchReport> {
        let mut report = DispatchReport::new(event);

        match &event.change_type {
            ChangeType::Test => {
                tracing::info!("Webhook test successful.");
                Ok(report)
            }
            ChangeType::Edit => {
                tracing::debug!("Edit event {} ignored", event.uuid);
                Ok(report)
            }
            ChangeType::Insert => {
                self.activate(event, false, &mut report).await?;
                Ok(report)
            }
            ChangeType::Unsuspend => {
                self.activate(event, true, &mut report).await?;
                Ok(report)
            }
            ChangeType::Suspend => {
                self.suspend(event, &mut report).await?;
                Ok(report)
            }
            ChangeType::End => {
                self.end(event, &mut report).await?;
                Ok(report)
            }
            ChangeType::Unknown(raw) => Err(BridgeError::Parse(format!(
                "unrecognized changeType '{}'",
                raw
            ))),
        }
    }

    /// insert / unsuspend: make the account live on the router.
    async fn activate(
        &self,
        event: &WebhookEvent,
        reuse_existing: bool,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let service = self.resolve_service(event).await?;
        let client = self.resolve_client(service.client_id).await?;
        report.ok(
            "fetch CRM records",
            Some(format!("client {}, service {}", client.id, service.id)),
        );

        let plan = ServicePlan::from_plan_name(service.plan_name());
        let base = format!("{}{}", self.config.secret_prefix, client.id);
        let comment = client
            .full_address
            .clone()
            .unwrap_or_else(|| client.display_name());

        // serialize allocate + create against other dispatches
        let _guard = self.write_lock.lock().await;

        let session = self.router.open().await?;
        report.ok("open router session", None);

        let secrets = session.list_secrets().await?;

        let existing = if reuse_existing {
            find_provisioned(&secrets, &base, &comment).cloned()
        } else {
            None
        };

        let remote = self.pick_remote_address(&service, plan, reuse_existing, &secrets)?;
        report.ok("allocate address", Some(remote.to_string()));

        let stored_password = if self.config.attr_password > 0 {
            client.attribute(self.config.attr_password).map(str::to_string)
        } else {
            None
        };

        let request = ProvisionRequest {
            device_name: base,
            device_password: stored_password.unwrap_or_else(generate_password),
            remote_address: remote.to_string(),
            comment,
            service_plan: plan,
        };

        let name = match existing {
            Some(secret) => {
                let id = secret.id.clone().unwrap_or_default();
                session
                    .set_remote_address(&id, &request.remote_address)
                    .await?;
                report.ok("re-enable secret", Some(secret.name.clone()));
                secret.name
            }
            None => {
                let name =
                    naming::unique_secret_name(session.as_ref(), &request.device_name).await?;
                report.ok("disambiguate name", Some(name.clone()));

                if request.service_plan.registers_inventory() {
                    let device = self.blackbox_descriptor(&name, &request.remote_address);
                    self.inventory.register_blackbox(&device).await?;
                    report.ok("inventory registration", Some(device.device_id));
                }

                session
                    .add_secret(&PppSecret {
                        id: None,
                        name: name.clone(),
                        password: Some(request.device_password.clone()),
                        remote_address: Some(request.remote_address.clone()),
                        service: ppp_service::PPPOE.to_string(),
                        comment: Some(request.comment.clone()),
                    })
                    .await?;
                report.ok("create secret", Some(name.clone()));
                name
            }
        };

        self.write_back(&client, &service, &name, &request, report)
            .await;
        Ok(())
    }

    /// suspend: keep the secret, point it at the sentinel, kick the session.
    async fn suspend(&self, event: &WebhookEvent, report: &mut DispatchReport) -> Result<()> {
        let (client, _service) = self.resolve_for_lookup(event).await?;
        let base = format!("{}{}", self.config.secret_prefix, client.id);
        let comment = client
            .full_address
            .clone()
            .unwrap_or_else(|| client.display_name());

        let _guard = self.write_lock.lock().await;
        let session = self.router.open().await?;
        report.ok("open router session", None);

        let secrets = session.list_secrets().await?;
        let secret = find_provisioned(&secrets, &base, &comment)
            .ok_or_else(|| BridgeError::NotFound(format!("secret for client {}", client.id)))?;
        report.ok("find secret", Some(secret.name.clone()));

        let id = secret.id.clone().unwrap_or_default();
        session
            .set_remote_address(&id, &self.config.suspend_address)
            .await?;
        report.ok(
            "block address",
            Some(self.config.suspend_address.clone()),
        );

        session.remove_active(&secret.name).await?;
        report.ok("drop active connection", None);
        Ok(())
    }

    /// end: remove the account entirely. Idempotent when already gone.
    async fn end(&self, event: &WebhookEvent, report: &mut DispatchReport) -> Result<()> {
        let (client, _service) = self.resolve_for_lookup(event).await?;
        let base = format!("{}{}", self.config.secret_prefix, client.id);
        let comment = client
            .full_address
            .clone()
            .unwrap_or_else(|| client.display_name());

        let _guard = self.write_lock.lock().await;
        let session = self.router.open().await?;
        report.ok("open router session", None);

        let secrets = session.list_secrets().await?;
        let secret = match find_provisioned(&secrets, &base, &comment) {
            Some(secret) => secret.clone(),
            None => {
                report.ok("secret already absent", Some(base));
                return Ok(());
            }
        };
        report.ok("find secret", Some(secret.name.clone()));

        session.remove_active(&secret.name).await?;
        report.ok("drop active connection", None);

        let id = secret.id.clone().unwrap_or_default();
        session.remove_secret(&id).await?;
        report.ok("remove secret", Some(secret.name));
        Ok(())
    }

    /// Events on a service fetch the service record; client events only
    /// carry the client id.
    async fn resolve_for_lookup(
        &self,
        event: &WebhookEvent,
    ) -> Result<(CrmClient, Option<CrmService>)> {
        match &event.entity {
            Entity::Client => {
                let client = self.resolve_client(event.entity_id).await?;
                Ok((client, None))
            }
            Entity::Service => {
                let service = self.resolve_service(event).await?;
                let client = self.resolve_client(service.client_id).await?;
                Ok((client, Some(service)))
            }
            Entity::Unknown(raw) => Err(BridgeError::Parse(format!(
                "unrecognized entity '{}'",
                raw
            ))),
        }
    }

    async fn resolve_service(&self, event: &WebhookEvent) -> Result<CrmService> {
        if event.entity != Entity::Service {
            return Err(BridgeError::Parse(format!(
                "{} event without a service entity",
                event.change_type.as_str()
            )));
        }
        let service_id = event
            .entity_id
            .ok_or_else(|| BridgeError::Parse("event is missing entityId".to_string()))?;
        self.crm.get_service(service_id).await
    }

    async fn resolve_client(&self, client_id: Option<i64>) -> Result<CrmClient> {
        let client_id =
            client_id.ok_or_else(|| BridgeError::NotFound("client for event".to_string()))?;
        self.crm.get_client(client_id).await
    }

    /// General plans and unsuspends keep the address already stored on
    /// the service; everything else draws a fresh one from the pool,
    /// skipping the remote-addresses already present on the router.
    fn pick_remote_address(
        &self,
        service: &CrmService,
        plan: ServicePlan,
        reuse: bool,
        secrets: &[PppSecret],
    ) -> Result<Ipv4Addr> {
        let stored: Option<Ipv4Addr> = service
            .attribute(self.config.attr_service_ip)
            .and_then(|v| v.parse().ok());

        if let Some(ip) = stored {
            if reuse || plan == ServicePlan::General {
                return Ok(ip);
            }
        }

        let in_use: HashSet<Ipv4Addr> = secrets
            .iter()
            .filter_map(|s| s.remote_address.as_deref())
            .filter_map(|a| a.parse().ok())
            .collect();
        self.pool.allocate(&in_use)
    }

    /// Patch the resulting identifiers back into the CRM. Failures here
    /// are recorded but never abort the dispatch.
    async fn write_back(
        &self,
        client: &CrmClient,
        service: &CrmService,
        name: &str,
        request: &ProvisionRequest,
        report: &mut DispatchReport,
    ) {
        if self.config.attr_service_ip > 0 {
            let patch = vec![AttributePatch {
                value: request.remote_address.clone(),
                custom_attribute_id: self.config.attr_service_ip,
            }];
            match self.crm.patch_service_attributes(service.id, patch).await {
                Ok(()) => report.ok("patch service address", Some(request.remote_address.clone())),
                Err(e) => report.fail("patch service address", &e),
            }
        }

        let mut patches = Vec::new();
        if self.config.attr_username > 0 {
            patches.push(AttributePatch {
                value: name.to_string(),
                custom_attribute_id: self.config.attr_username,
            });
        }
        if self.config.attr_password > 0 {
            patches.push(AttributePatch {
                value: request.device_password.clone(),
                custom_attribute_id: self.config.attr_password,
            });
        }
        if self.config.attr_address > 0 {
            patches.push(AttributePatch {
                value: request.comment.clone(),
                custom_attribute_id: self.config.attr_address,
            });
        }
        if !patches.is_empty() {
            match self.crm.patch_client_attributes(client.id, patches).await {
                Ok(()) => report.ok("patch client credentials", None),
                Err(e) => report.fail("patch client credentials", &e),
            }
        }
    }

    fn blackbox_descriptor(&self, hostname: &str, ip_address: &str) -> BlackboxConfig {
        let mac = random_mac();
        BlackboxConfig {
            device_id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.to_string(),
            mac_address: mac.clone(),
            site_id: self.config.site_id.clone(),
            ip_address: ip_address.to_string(),
            interfaces: vec![BlackboxInterface {
                id: "eth0".to_string(),
                name: "eth0".to_string(),
                mac,
                position: 0,
            }],
        }
    }
}

/// Match a provisioned secret by canonical name (base or disambiguated
/// base) or, failing that, by the comment the secret was created with.
fn find_provisioned<'a>(
    secrets: &'a [PppSecret],
    base: &str,
    comment: &str,
) -> Option<&'a PppSecret> {
    secrets
        .iter()
        .find(|s| s.name == base || s.name.starts_with(&format!("{}-", base)))
        .or_else(|| {
            secrets
                .iter()
                .find(|s| !comment.is_empty() && s.comment.as_deref() == Some(comment))
        })
}

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuwxyzABCDEFGHIJKLMNOPQRSTUWXYZ0123456789";

/// 8-character device password, same alphabet the billing platform
/// provisions by hand.
fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Locally administered unicast MAC for blackbox registrations.
fn random_mac() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill(&mut bytes);
    bytes[0] = (bytes[0] | 0x02) & 0xFE;
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn event(change_type: &str, entity: &str, entity_id: i64) -> WebhookEvent {
        WebhookEvent {
            uuid: "test-uuid".to_string(),
            change_type: ChangeType::parse(change_type),
            entity: Entity::parse(entity),
            entity_id: Some(entity_id),
            event_name: None,
        }
    }

    struct Harness {
        journal: Journal,
        router: Arc<FakeRouter>,
        provisioner: Provisioner,
    }

    fn harness(setup: impl FnOnce(&mut FakeCrm, &mut FakeInventory)) -> Harness {
        let journal = new_journal();
        let router = Arc::new(FakeRouter::with_journal(journal.clone()));
        let mut crm = FakeCrm::with_journal(journal.clone());
        let mut inventory = FakeInventory::with_journal(journal.clone());
        setup(&mut crm, &mut inventory);
        let provisioner = Provisioner::new(
            test_config(),
            Arc::new(crm),
            Arc::new(inventory),
            router.clone(),
        )
        .unwrap();
        Harness {
            journal,
            router,
            provisioner,
        }
    }

    /// CRM fixture: client 12 at "str. x, nr. y" with service 5
    fn standard_records(plan: &str, service_attrs: Vec<(i64, &str)>) -> Harness {
        let plan = plan.to_string();
        harness(move |crm, _| {
            crm.add_client(12, "str. x, nr. y", vec![]);
            crm.add_service(5, 12, &plan, service_attrs);
        })
    }

    #[tokio::test]
    async fn test_test_event_makes_no_calls() {
        let h = harness(|_, _| {});
        let report = h
            .provisioner
            .dispatch(&event("test", "service", 5))
            .await
            .unwrap();
        assert!(report.steps.is_empty());
        assert!(journal_entries(&h.journal).is_empty());
    }

    #[tokio::test]
    async fn test_edit_event_is_noop() {
        let h = harness(|_, _| {});
        h.provisioner
            .dispatch(&event("edit", "service", 5))
            .await
            .unwrap();
        assert!(journal_entries(&h.journal).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_change_type_fails_fast() {
        let h = harness(|_, _| {});
        let err = h
            .provisioner
            .dispatch(&event("archive", "service", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
        assert!(journal_entries(&h.journal).is_empty());
    }

    #[tokio::test]
    async fn test_insert_internet_orders_calls() {
        let h = standard_records("Internet 100M", vec![]);
        let report = h
            .provisioner
            .dispatch(&event("insert", "service", 5))
            .await
            .unwrap();
        assert!(!report.has_failures());

        let register = position_of(&h.journal, "nms.register").expect("inventory call");
        let add = position_of(&h.journal, "router.add_secret").expect("secret add");
        let patch = position_of(&h.journal, "crm.patch_service").expect("CRM patch");
        assert!(register < add, "inventory registration precedes secret add");
        assert!(add < patch, "secret add precedes CRM write-back");
        assert!(position_of(&h.journal, "crm.patch_client").is_some());

        assert_eq!(h.router.secret_names(), vec!["07NAV12".to_string()]);
        let secrets = h.router.secrets.lock().unwrap();
        let remote: std::net::Ipv4Addr =
            secrets[0].remote_address.as_deref().unwrap().parse().unwrap();
        assert!(remote.octets()[..3] == [10, 0, 4], "allocated from the pool");
        assert_eq!(secrets[0].service, "pppoe");
        assert_eq!(secrets[0].comment.as_deref(), Some("str. x, nr. y"));
    }

    #[tokio::test]
    async fn test_insert_inventory_failure_blocks_router() {
        let h = harness(|crm, inventory| {
            crm.add_client(12, "str. x, nr. y", vec![]);
            crm.add_service(5, 12, "Internet 100M", vec![]);
            inventory.fail_register = true;
        });
        let err = h
            .provisioner
            .dispatch(&event("insert", "service", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RemoteCall(_)));
        assert!(position_of(&h.journal, "router.add_secret").is_none());
        assert!(h.router.secret_names().is_empty());
    }

    #[tokio::test]
    async fn test_insert_general_plan_skips_inventory() {
        let h = standard_records("General", vec![(1, "10.9.9.9")]);
        h.provisioner
            .dispatch(&event("insert", "service", 5))
            .await
            .unwrap();
        assert!(position_of(&h.journal, "nms.register").is_none());
        let secrets = h.router.secrets.lock().unwrap();
        assert_eq!(secrets[0].remote_address.as_deref(), Some("10.9.9.9"));
    }

    #[tokio::test]
    async fn test_insert_collision_disambiguates() {
        let h = standard_records("Internet 100M", vec![]);
        h.router.seed_secret("07NAV12", "10.0.4.1", "other premises");
        h.provisioner
            .dispatch(&event("insert", "service", 5))
            .await
            .unwrap();
        let names = h.router.secret_names();
        assert!(names.contains(&"07NAV12-1".to_string()), "names: {:?}", names);
    }

    #[tokio::test]
    async fn test_unsuspend_reenables_existing_secret() {
        let h = standard_records("Internet 100M", vec![(1, "10.0.4.2")]);
        h.router.seed_secret("07NAV12", "1.1.1.1", "str. x, nr. y");
        h.provisioner
            .dispatch(&event("unsuspend", "service", 5))
            .await
            .unwrap();

        assert!(position_of(&h.journal, "router.add_secret").is_none());
        assert!(position_of(&h.journal, "nms.register").is_none());
        let secrets = h.router.secrets.lock().unwrap();
        assert_eq!(secrets[0].remote_address.as_deref(), Some("10.0.4.2"));
    }

    #[tokio::test]
    async fn test_suspend_blocks_address_then_kicks_session() {
        let h = standard_records("Internet 100M", vec![]);
        h.router.seed_secret("07NAV12", "10.0.4.2", "str. x, nr. y");
        h.provisioner
            .dispatch(&event("suspend", "service", 5))
            .await
            .unwrap();

        let set = position_of(&h.journal, "router.set_remote").expect("sentinel write");
        let kick = position_of(&h.journal, "router.remove_active").expect("session kick");
        assert!(set < kick);
        let entries = journal_entries(&h.journal);
        assert!(entries[set].ends_with("1.1.1.1"), "entry: {}", entries[set]);

        let secrets = h.router.secrets.lock().unwrap();
        assert_eq!(secrets[0].remote_address.as_deref(), Some("1.1.1.1"));
    }

    #[tokio::test]
    async fn test_suspend_missing_secret_is_not_found() {
        let h = standard_records("Internet 100M", vec![]);
        let err = h
            .provisioner
            .dispatch(&event("suspend", "service", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_end_removes_in_order() {
        let h = standard_records("Internet 100M", vec![]);
        h.router.seed_secret("07NAV12", "10.0.4.2", "str. x, nr. y");
        h.provisioner
            .dispatch(&event("end", "service", 5))
            .await
            .unwrap();

        let kick = position_of(&h.journal, "router.remove_active").expect("session kick");
        let remove = position_of(&h.journal, "router.remove_secret").expect("secret removal");
        assert!(kick < remove);
        assert!(h.router.secret_names().is_empty());
    }

    #[tokio::test]
    async fn test_end_absent_secret_is_idempotent() {
        let h = standard_records("Internet 100M", vec![]);
        let report = h
            .provisioner
            .dispatch(&event("end", "service", 5))
            .await
            .unwrap();
        assert!(!report.has_failures());
        assert!(position_of(&h.journal, "router.remove_active").is_none());
        assert!(position_of(&h.journal, "router.remove_secret").is_none());
    }

    #[tokio::test]
    async fn test_insert_then_end_leaves_no_secret() {
        let h = standard_records("Internet 100M", vec![]);
        h.provisioner
            .dispatch(&event("insert", "service", 5))
            .await
            .unwrap();
        assert_eq!(h.router.secret_names().len(), 1);

        h.provisioner
            .dispatch(&event("end", "service", 5))
            .await
            .unwrap();
        assert!(
            h.router
                .secret_names()
                .iter()
                .all(|n| !n.starts_with("07NAV12")),
            "round trip must leave no secret behind"
        );
    }

    #[tokio::test]
    async fn test_client_entity_suspend_uses_entity_id_as_client() {
        let h = harness(|crm, _| {
            crm.add_client(12, "str. x, nr. y", vec![]);
        });
        h.router.seed_secret("07NAV12", "10.0.4.2", "str. x, nr. y");
        h.provisioner
            .dispatch(&event("suspend", "client", 12))
            .await
            .unwrap();
        assert!(position_of(&h.journal, "crm.get_service").is_none());
        assert!(position_of(&h.journal, "router.set_remote").is_some());
    }
}
