use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::models::{WebhookEnvelope, WebhookEvent};
use crate::AppState;

use super::ApiError;

/// Acknowledgment returned to the CRM for every accepted event.
#[derive(Serialize)]
pub struct WebhookAck {
    pub accepted: bool,
    pub uuid: String,
}

/// Receive one webhook delivery.
///
/// An empty, unparsable, or uuid-less body is rejected with 400 before
/// any external call. Everything else is acknowledged immediately and
/// provisioned in a detached task, so a slow router never stalls the
/// CRM's delivery queue and an aborted request still runs to completion.
/// Provisioning failures are logged, never surfaced to the caller.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::bad_request("empty request body"));
    }

    let envelope: WebhookEnvelope = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed webhook body: {}", e)))?;

    let event = WebhookEvent::from_envelope(envelope)?;
    tracing::info!(
        "Webhook {} received: {} {}",
        event.uuid,
        event.change_type.as_str(),
        event
            .event_name
            .as_deref()
            .unwrap_or("(unnamed event)"),
    );

    let uuid = event.uuid.clone();
    let provisioner = state.provisioner.clone();
    tokio::spawn(async move {
        match provisioner.dispatch(&event).await {
            Ok(report) if report.has_failures() => {
                tracing::warn!(
                    "Webhook {} completed with failed steps: {}",
                    event.uuid,
                    serde_json::to_string(&report.steps).unwrap_or_default()
                );
            }
            Ok(_) => {
                tracing::info!("Webhook {} processed", event.uuid);
            }
            Err(e) => {
                tracing::error!("Webhook {} provisioning failed: {}", event.uuid, e);
            }
        }
    });

    Ok(Json(WebhookAck {
        accepted: true,
        uuid,
    }))
}
