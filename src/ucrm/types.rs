use serde::{Deserialize, Serialize};

// --- UCRM API types ---

/// Custom attribute value as returned on clients and services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAttribute {
    pub custom_attribute_id: i64,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Client record fetched from `GET /clients/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmClient {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub full_address: Option<String>,
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
}

impl CrmClient {
    pub fn attribute(&self, custom_attribute_id: i64) -> Option<&str> {
        attribute_value(&self.attributes, custom_attribute_id)
    }

    pub fn display_name(&self) -> String {
        if let Some(company) = self.company_name.as_deref().filter(|s| !s.is_empty()) {
            return company.to_string();
        }
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        format!("{} {}", first, last).trim().to_string()
    }
}

/// Service record fetched from `GET /clients/services/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmService {
    pub id: i64,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub service_plan_name: Option<String>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub attributes: Vec<CustomAttribute>,
}

impl CrmService {
    pub fn attribute(&self, custom_attribute_id: i64) -> Option<&str> {
        attribute_value(&self.attributes, custom_attribute_id)
    }

    /// Plan name used for the Internet/General capability split.
    pub fn plan_name(&self) -> &str {
        self.service_plan_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }
}

fn attribute_value(attributes: &[CustomAttribute], custom_attribute_id: i64) -> Option<&str> {
    attributes
        .iter()
        .find(|a| a.custom_attribute_id == custom_attribute_id)
        .and_then(|a| a.value.as_deref())
        .filter(|v| !v.is_empty())
}

// --- Patch request types ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributePatch {
    pub value: String,
    pub custom_attribute_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttributesPayload {
    pub attributes: Vec<AttributePatch>,
}
