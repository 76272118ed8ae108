use serde::Deserialize;

use crate::error::BridgeError;

/// Lifecycle transition carried by a webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Suspend,
    Unsuspend,
    End,
    Edit,
    Test,
    Unknown(String),
}

impl ChangeType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "insert" => Self::Insert,
            "suspend" => Self::Suspend,
            "unsuspend" => Self::Unsuspend,
            "end" => Self::End,
            "edit" => Self::Edit,
            "test" => Self::Test,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Suspend => "suspend",
            Self::Unsuspend => "unsuspend",
            Self::End => "end",
            Self::Edit => "edit",
            Self::Test => "test",
            Self::Unknown(other) => other,
        }
    }
}

/// Entity kind the event refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Client,
    Service,
    Unknown(String),
}

impl Entity {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "client" => Self::Client,
            "service" => Self::Service,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Raw webhook body as delivered by the CRM
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub entity_id: Option<serde_json::Value>,
    #[serde(default)]
    pub event_name: Option<String>,
}

/// Parsed webhook event. Immutable once built; lives for one dispatch only.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub uuid: String,
    pub change_type: ChangeType,
    pub entity: Entity,
    pub entity_id: Option<i64>,
    pub event_name: Option<String>,
}

impl WebhookEvent {
    /// Build an event from the raw envelope. A missing uuid is the only
    /// hard parse failure; unknown changeType/entity values are carried
    /// through so the provisioner can reject them with the raw value.
    pub fn from_envelope(envelope: WebhookEnvelope) -> Result<Self, BridgeError> {
        let uuid = envelope
            .uuid
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BridgeError::Parse("missing uuid field".to_string()))?;

        // The CRM delivers entityId as either a number or a string
        let entity_id = match envelope.entity_id {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };

        Ok(Self {
            uuid,
            change_type: ChangeType::parse(envelope.change_type.as_deref().unwrap_or("")),
            entity: Entity::parse(envelope.entity.as_deref().unwrap_or("")),
            entity_id,
            event_name: envelope.event_name,
        })
    }
}

/// Service plan capability flag. Internet plans get a public address and
/// an inventory registration; General plans reuse the service-attribute
/// address and stay out of the NMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePlan {
    Internet,
    General,
}

impl ServicePlan {
    pub fn from_plan_name(name: &str) -> Self {
        if name.to_lowercase().contains("internet") {
            Self::Internet
        } else {
            Self::General
        }
    }

    pub fn registers_inventory(self) -> bool {
        matches!(self, Self::Internet)
    }
}

/// Canonical PPP service type values
pub mod ppp_service {
    pub const PPPOE: &str = "pppoe";
}

/// A PPP secret as held by the router. `id` is the router-assigned
/// internal id (`*1`, `*2`, ...) and is None for secrets not yet created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppSecret {
    pub id: Option<String>,
    pub name: String,
    pub password: Option<String>,
    pub remote_address: Option<String>,
    pub service: String,
    pub comment: Option<String>,
}

/// Everything the provisioner needs to create one PPP account.
/// Built fresh per event, never reused across events.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub device_name: String,
    pub device_password: String,
    pub remote_address: String,
    pub comment: String,
    pub service_plan: ServicePlan,
}
