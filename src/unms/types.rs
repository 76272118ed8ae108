use serde::{Deserialize, Serialize};

// --- UNMS API types ---

/// Device descriptor pushed to `POST /devices/blackboxes/config`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackboxConfig {
    pub device_id: String,
    pub hostname: String,
    pub mac_address: String,
    pub site_id: String,
    pub ip_address: String,
    pub interfaces: Vec<BlackboxInterface>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackboxInterface {
    pub id: String,
    pub name: String,
    pub mac: String,
    pub position: i32,
}

/// Slim view of an inventory device, enough for the usage page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NmsDevice {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub identification: Option<NmsIdentification>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NmsIdentification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl NmsDevice {
    /// The address portion of `ipAddress`, which the NMS reports in
    /// CIDR form (`"10.0.4.7/24"`) for some device types.
    pub fn plain_address(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(|ip| ip.split('/').next().unwrap_or(ip))
    }
}
