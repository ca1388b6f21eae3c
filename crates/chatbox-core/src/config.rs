use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Relay tuning — shared by the bridge worker and the gateway
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const UPSTREAM_TIMEOUT_SECS: u64 = 60; // hard deadline for one upstream fetch
pub const DEFAULT_READ_CHUNK_BYTES: usize = 1; // smallest reads, fastest first token
pub const HANDOFF_CAPACITY: usize = 32; // worker → delivery channel bound
pub const POLL_INTERVAL_MS: u64 = 10; // delivery-side channel poll timeout
pub const WORKER_JOIN_TIMEOUT_MS: u64 = 1_000; // bounded wait for worker teardown
pub const DEFAULT_USER_ID: &str = "default_user";

/// Top-level config (chatbox.toml + CHATBOX_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatboxConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for ChatboxConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            upstream: UpstreamConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Upstream relay behaviour.
///
/// `base_url` is the fallback for users whose stored settings carry no base
/// URL of their own. The OpenRouter fields feed the `HTTP-Referer` /
/// `X-Title` headers that endpoint requires for attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Overall timeout for one streaming fetch, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Read granularity for the worker's blocking reads. 1 byte gives the
    /// lowest time-to-first-token; raise it to trade latency for fewer
    /// syscalls on high-throughput deployments.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    #[serde(default = "default_openrouter_referer")]
    pub openrouter_referer: String,
    #[serde(default = "default_openrouter_app_name")]
    pub openrouter_app_name: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: UPSTREAM_TIMEOUT_SECS,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            openrouter_referer: default_openrouter_referer(),
            openrouter_app_name: default_openrouter_app_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_timeout_secs() -> u64 {
    UPSTREAM_TIMEOUT_SECS
}
fn default_read_chunk_bytes() -> usize {
    DEFAULT_READ_CHUNK_BYTES
}
fn default_base_url() -> String {
    // Legacy deployments exported OPENAI_API_BASE; still honoured here.
    std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}
fn default_openrouter_referer() -> String {
    std::env::var("OPENROUTER_REFERER").unwrap_or_else(|_| "http://localhost:20001".to_string())
}
fn default_openrouter_app_name() -> String {
    std::env::var("OPENROUTER_APP_NAME").unwrap_or_else(|_| "Chatbox".to_string())
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatbox/chatbox.db", home)
}

impl ChatboxConfig {
    /// Load config from a TOML file with CHATBOX_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.chatbox/chatbox.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: ChatboxConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHATBOX_").split("_"))
            .extract()
            .map_err(|e| crate::error::ChatboxError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chatbox/chatbox.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ChatboxConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert_eq!(cfg.upstream.timeout_secs, 60);
        assert_eq!(cfg.upstream.read_chunk_bytes, 1);
        assert!(cfg.database.path.ends_with("chatbox.db"));
    }

    #[test]
    fn empty_toml_fills_every_section() {
        let cfg: ChatboxConfig = Figment::new()
            .merge(Toml::string(""))
            .extract()
            .expect("empty config should deserialize");
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert!(!cfg.upstream.base_url.is_empty());
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg: ChatboxConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [gateway]
                port = 9000

                [upstream]
                timeout_secs = 5
                read_chunk_bytes = 4096
                "#,
            ))
            .extract()
            .expect("valid config");
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.upstream.timeout_secs, 5);
        assert_eq!(cfg.upstream.read_chunk_bytes, 4096);
        // untouched sections keep defaults
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
    }
}
