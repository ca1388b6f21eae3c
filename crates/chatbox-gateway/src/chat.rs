//! Request plumbing shared by the HTTP and WebSocket chat endpoints:
//! inbound body shape, validation, and assembly of the upstream request
//! from the caller's stored settings.

use serde::Deserialize;
use tracing::{debug, warn};

use chatbox_core::config::DEFAULT_USER_ID;
use chatbox_relay::{ChatMessage, ChatRequest, ProviderQuirks, Role, UpstreamCredentials};
use chatbox_settings::types::DEFAULT_MODEL;

use crate::app::AppState;

/// Rejection text for bodies carrying neither a history nor a single message.
pub const MISSING_INPUT: &str = "Either 'messages' or 'message' field is required";
/// No settings row exists for this user.
pub const NO_SETTINGS: &str = "API key not configured. Please configure your settings first.";
/// A settings row exists but its key is blank.
pub const NO_API_KEY: &str = "API key not configured. Please add your API key in settings.";

/// Inbound chat body, accepted over both HTTP POST and the WS text channel.
///
/// Clients send either `messages` (full history) or `message` (one user
/// turn); `messages` wins when both are present.
#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub options: ChatOptions,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Per-request overrides. Sampling parameters deliberately have no
/// override here; they always come from the stored settings.
#[derive(Debug, Default, Deserialize)]
pub struct ChatOptions {
    #[serde(default)]
    pub model: Option<String>,
}

/// A validated turn, ready for credential resolution.
#[derive(Debug)]
pub struct ChatTurn {
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
    pub model_override: Option<String>,
}

impl ChatBody {
    /// Validate and normalise the inbound body.
    pub fn into_turn(self) -> Result<ChatTurn, &'static str> {
        let messages = if !self.messages.is_empty() {
            self.messages
        } else if let Some(text) = self.message.filter(|m| !m.is_empty()) {
            vec![ChatMessage {
                role: Role::User,
                content: text,
            }]
        } else {
            return Err(MISSING_INPUT);
        };

        Ok(ChatTurn {
            user_id: self
                .user_id
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            messages,
            model_override: self.options.model,
        })
    }
}

/// Resolve credentials and build the upstream request for one turn.
///
/// Reads the caller's stored settings exactly once; the relay never
/// re-reads them mid-stream. The returned error string is client-facing
/// and is delivered through the already-committed stream framing.
pub fn prepare(
    state: &AppState,
    turn: ChatTurn,
) -> Result<(ChatRequest, UpstreamCredentials), String> {
    let settings = match state.settings.get(&turn.user_id) {
        Ok(Some(settings)) => settings,
        Ok(None) => return Err(NO_SETTINGS.to_string()),
        Err(e) => {
            warn!(user_id = %turn.user_id, error = %e, "settings lookup failed");
            return Err(e.to_string());
        }
    };

    if !settings.has_api_key() {
        return Err(NO_API_KEY.to_string());
    }
    let api_key = settings.api_key.unwrap_or_default();

    // options.model, else the stored model, else the global default
    let mut model = turn
        .model_override
        .filter(|m| !m.is_empty())
        .unwrap_or(settings.model);
    if model.is_empty() {
        model = DEFAULT_MODEL.to_string();
    }

    let base_url = settings
        .base_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.config.upstream.base_url.clone());
    let quirks = ProviderQuirks::detect(&base_url, &state.config.upstream);

    debug!(user_id = %turn.user_id, model = %model, "chat turn prepared");

    Ok((
        ChatRequest {
            model,
            messages: turn.messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
        },
        UpstreamCredentials {
            api_key,
            base_url,
            quirks,
        },
    ))
}
