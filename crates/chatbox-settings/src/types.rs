use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TOP_P: f64 = 1.0;

/// Per-user upstream configuration.
///
/// One row per `user_id`, lazily created with defaults on first access so a
/// read always has something to return. The API key is stored in the clear;
/// read endpoints must go through [`masked`](Self::masked).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    /// Upstream API key; `None` or empty means not configured yet.
    pub api_key: Option<String>,
    /// Per-user override for the upstream base URL.
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last update.
    pub updated_at: String,
}

impl UserSettings {
    /// True when a non-empty API key is stored.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Copy with the API key masked, for read endpoints.
    pub fn masked(&self) -> Self {
        Self {
            api_key: self.api_key.as_deref().map(mask_key),
            ..self.clone()
        }
    }
}

/// Mask an API key for display: everything but the last four characters
/// becomes `****`. Values of four characters or fewer pass through.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return key.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Partial settings update. `None` fields keep their stored value; an empty
/// string is a deliberate value (e.g. clearing the API key).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

impl SettingsPatch {
    /// Range-check the sampling parameters before anything touches the DB.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(SettingsError::Invalid(format!(
                    "temperature must be between 0 and 2, got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(SettingsError::Invalid(format!(
                    "top_p must be between 0 and 1, got {p}"
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(SettingsError::Invalid(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
