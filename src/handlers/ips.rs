use std::collections::HashSet;
use std::sync::Arc;

use axum::{extract::State, response::Html};

use crate::AppState;

use super::ApiError;

/// Render the managed ranges as an HTML table, marking every address
/// currently held by an inventory device. An unreachable NMS degrades to
/// an all-free view rather than an error page.
pub async fn ip_usage(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let used: HashSet<String> = match state.inventory.list_devices().await {
        Ok(devices) => devices
            .iter()
            .filter_map(|d| d.plain_address())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            tracing::warn!("Could not list NMS devices for usage view: {}", e);
            HashSet::new()
        }
    };

    let rows: Vec<serde_json::Value> = state
        .pool
        .addresses()
        .iter()
        .map(|ip| {
            let ip = ip.to_string();
            let in_use = used.contains(&ip);
            serde_json::json!({ "ip": ip, "used": in_use })
        })
        .collect();

    let mut context = tera::Context::new();
    context.insert("ranges", &state.config.ip_ranges);
    context.insert("rows", &rows);

    let html = state
        .templates
        .render("ip_usage.html", &context)
        .map_err(|e| ApiError::internal(format!("template render failed: {}", e)))?;
    Ok(Html(html))
}
