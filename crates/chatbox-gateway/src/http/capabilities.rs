//! POST /api/chat/test-capabilities — function-calling capability check.
//!
//! Sends one minimal `tools` request upstream with the caller's stored
//! credentials and maps the answer onto a tri-state
//! `supportsFunctionCalling` flag. Configuration problems are plain 400
//! responses; once the check runs, the endpoint always answers 200, with
//! `null` and a reason when no verdict could be reached.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use chatbox_core::config::DEFAULT_USER_ID;
use chatbox_relay::{ProviderQuirks, ToolSupport, UpstreamCredentials};
use chatbox_settings::types::DEFAULT_MODEL;

use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CapabilitiesBody {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn test_capabilities(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CapabilitiesBody>,
) -> (StatusCode, Json<Value>) {
    let model = body
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let user_id = body
        .user_id
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    let settings = match state.settings.get(&user_id) {
        Ok(Some(settings)) => settings,
        Ok(None) => return config_error(&model, "User settings not found"),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "settings lookup failed");
            let unknown = ToolSupport::Unknown {
                reason: e.to_string(),
            };
            return capability_result(&model, unknown);
        }
    };
    if !settings.has_api_key() {
        return config_error(&model, "API key not configured");
    }

    let base_url = settings
        .base_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.config.upstream.base_url.clone());
    let quirks = ProviderQuirks::detect(&base_url, &state.config.upstream);
    let creds = UpstreamCredentials {
        api_key: settings.api_key.unwrap_or_default(),
        base_url,
        quirks,
    };

    let client = state.upstream.clone();
    let check_model = model.clone();
    let support =
        match tokio::task::spawn_blocking(move || client.check_tools(&check_model, &creds)).await {
            Ok(support) => support,
            Err(e) => ToolSupport::Unknown {
                reason: e.to_string(),
            },
        };

    info!(model = %model, support = ?support, "capability check finished");
    capability_result(&model, support)
}

/// 400 for problems in the caller's own configuration, mirroring the
/// streaming endpoints' pre-stream rejections.
fn config_error(model: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "supportsFunctionCalling": false,
            "model": model,
        })),
    )
}

/// 200 body mapping [`ToolSupport`] onto the tri-state flag.
fn capability_result(model: &str, support: ToolSupport) -> (StatusCode, Json<Value>) {
    let payload = match support {
        ToolSupport::Supported => json!({
            "supportsFunctionCalling": true,
            "model": model,
        }),
        ToolSupport::Unsupported => json!({
            "supportsFunctionCalling": false,
            "model": model,
        }),
        ToolSupport::Unknown { reason } => json!({
            "supportsFunctionCalling": null,
            "model": model,
            "error": reason,
        }),
    };
    (StatusCode::OK, Json(payload))
}
