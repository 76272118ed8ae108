use std::env;

use crate::error::BridgeError;
use crate::ipam::IpPool;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub router_host: String,
    pub router_port: u16,
    pub router_user: String,
    pub router_pass: String,
    pub crm_url: String,
    pub crm_app_key: String,
    pub nms_url: String,
    pub nms_token: String,
    /// Comma-separated CIDR list of the managed public ranges
    pub ip_ranges: String,
    /// Prefix for generated PPP secret names; the client id is appended
    pub secret_prefix: String,
    /// Unroutable sentinel written into suspended secrets
    pub suspend_address: String,
    /// NMS site the blackbox CPEs are registered under
    pub site_id: String,
    /// CRM custom attribute ids patched back after provisioning.
    /// An id of 0 disables that patch.
    pub attr_service_ip: i64,
    pub attr_username: i64,
    pub attr_password: i64,
    pub attr_address: i64,
    pub call_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:8080"),
            router_host: get_env("ROUTER_HOST", ""),
            router_port: get_env("ROUTER_PORT", "8728").parse().unwrap_or(8728),
            router_user: get_env("ROUTER_USER", ""),
            router_pass: get_env("ROUTER_PASS", ""),
            crm_url: get_env("CRM_URL", ""),
            crm_app_key: get_env("CRM_APP_KEY", ""),
            nms_url: get_env("NMS_URL", ""),
            nms_token: get_env("NMS_TOKEN", ""),
            ip_ranges: get_env("IP_RANGES", ""),
            secret_prefix: get_env("SECRET_PREFIX", "07NAV"),
            suspend_address: get_env("SUSPEND_ADDRESS", "1.1.1.1"),
            site_id: get_env("SITE_ID", ""),
            attr_service_ip: get_env("ATTR_SERVICE_IP", "0").parse().unwrap_or(0),
            attr_username: get_env("ATTR_USERNAME", "0").parse().unwrap_or(0),
            attr_password: get_env("ATTR_PASSWORD", "0").parse().unwrap_or(0),
            attr_address: get_env("ATTR_ADDRESS", "0").parse().unwrap_or(0),
            call_timeout_secs: get_env("CALL_TIMEOUT_SECS", "10").parse().unwrap_or(10),
        }
    }

    /// Check everything the provisioner needs before any external call
    /// is made. Every problem is reported at once.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let mut errors: Vec<String> = Vec::new();

        if self.router_host.is_empty() {
            errors.push("router host must be configured".to_string());
        }
        if self.router_user.is_empty() {
            errors.push("router user must be configured".to_string());
        }
        if self.router_pass.is_empty() {
            errors.push("router password must be configured".to_string());
        }
        if self.crm_url.is_empty() {
            errors.push("CRM URL must be configured".to_string());
        }
        if self.crm_app_key.is_empty() {
            errors.push("CRM app key must be configured".to_string());
        }
        if self.ip_ranges.trim().is_empty() {
            errors.push("managed IP range list must be configured".to_string());
        } else if let Err(e) = IpPool::from_cidr_list(&self.ip_ranges) {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Config(errors.join("; ")))
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
