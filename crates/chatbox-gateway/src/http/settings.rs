//! GET/PUT /api/settings — the stored-settings boundary.
//!
//! API keys never leave this process unmasked; both endpoints respond with
//! the masked row.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use chatbox_core::config::DEFAULT_USER_ID;
use chatbox_settings::{SettingsError, SettingsPatch, UserSettings};

use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SettingsQuery {
    pub user_id: Option<String>,
}

/// PUT body: optional user id plus any subset of the settings fields.
#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub patch: SettingsPatch,
}

#[derive(Serialize)]
pub struct SettingsApiError {
    pub error: String,
}

/// GET /api/settings — current settings, creating the defaults row on
/// first access.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<UserSettings>, (StatusCode, Json<SettingsApiError>)> {
    let user_id = query.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    match state.settings.get_or_create(&user_id) {
        Ok(settings) => Ok(Json(settings.masked())),
        Err(e) => Err(settings_error(e)),
    }
}

/// PUT /api/settings — partial update; omitted fields keep their value.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SettingsUpdate>,
) -> Result<Json<UserSettings>, (StatusCode, Json<SettingsApiError>)> {
    let user_id = body.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    match state.settings.update(&user_id, &body.patch) {
        Ok(settings) => Ok(Json(settings.masked())),
        Err(e) => Err(settings_error(e)),
    }
}

fn settings_error(e: SettingsError) -> (StatusCode, Json<SettingsApiError>) {
    let status = match &e {
        SettingsError::Invalid(_) => StatusCode::BAD_REQUEST,
        SettingsError::Database(_) => {
            warn!(error = %e, "settings query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(SettingsApiError {
            error: e.to_string(),
        }),
    )
}
