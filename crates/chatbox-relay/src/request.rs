use chatbox_core::config::UpstreamConfig;
use serde::{Deserialize, Serialize};

/// One turn of the conversation sent upstream. Inbound bodies may omit
/// either field; the role defaults to `user`, the content to empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

/// A chat-completion request. Immutable once dispatched; sampling
/// parameters come from the requesting user's stored settings.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

/// Upstream credentials, resolved once per request before the stream opens.
/// The relay never mutates these and never re-reads settings mid-stream.
#[derive(Debug, Clone)]
pub struct UpstreamCredentials {
    pub api_key: String,
    pub base_url: String,
    pub quirks: ProviderQuirks,
}

/// Extra request shaping some upstream endpoints require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderQuirks {
    /// Plain OpenAI-compatible endpoint, no extra headers.
    Standard,
    /// OpenRouter wants `HTTP-Referer` / `X-Title` attribution headers.
    OpenRouter { referer: String, app_name: String },
}

impl ProviderQuirks {
    /// Pick the quirk set for a base URL.
    pub fn detect(base_url: &str, upstream: &UpstreamConfig) -> Self {
        if base_url.to_lowercase().contains("openrouter.ai") {
            ProviderQuirks::OpenRouter {
                referer: upstream.openrouter_referer.clone(),
                app_name: upstream.openrouter_app_name.clone(),
            }
        } else {
            ProviderQuirks::Standard
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: "hi".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn role_rejects_unknown_values() {
        let err = serde_json::from_str::<ChatMessage>(r#"{"role":"robot","content":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn openrouter_detection_is_case_insensitive() {
        let upstream = UpstreamConfig::default();
        let quirks = ProviderQuirks::detect("https://OpenRouter.ai/api/v1", &upstream);
        assert!(matches!(quirks, ProviderQuirks::OpenRouter { .. }));

        let quirks = ProviderQuirks::detect("https://api.openai.com/v1", &upstream);
        assert_eq!(quirks, ProviderQuirks::Standard);
    }

    #[test]
    fn openrouter_quirks_carry_configured_attribution() {
        let mut upstream = UpstreamConfig::default();
        upstream.openrouter_referer = "https://example.com".to_string();
        upstream.openrouter_app_name = "Example".to_string();

        match ProviderQuirks::detect("https://openrouter.ai/api", &upstream) {
            ProviderQuirks::OpenRouter { referer, app_name } => {
                assert_eq!(referer, "https://example.com");
                assert_eq!(app_name, "Example");
            }
            other => panic!("expected OpenRouter quirks, got {other:?}"),
        }
    }
}
