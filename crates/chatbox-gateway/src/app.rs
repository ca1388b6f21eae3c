use axum::{Router, routing::{get, post}};
use chatbox_core::config::ChatboxConfig;
use chatbox_relay::UpstreamClient;
use chatbox_settings::SettingsStore;
use std::sync::Arc;

/// Short git commit hash embedded at build time.
pub const GIT_SHA: &str = env!("CHATBOX_GIT_SHA");

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ChatboxConfig,
    pub settings: SettingsStore,
    /// Shared blocking client; cloned into each relay worker.
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: ChatboxConfig, settings: SettingsStore, upstream: UpstreamClient) -> Self {
        Self {
            config,
            settings,
            upstream,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws/chat", get(crate::ws::connection::ws_handler))
        .route("/api/chat/stream", post(crate::http::stream::stream_chat))
        .route(
            "/api/chat/test-stream",
            get(crate::http::demo::test_stream_handler),
        )
        .route(
            "/api/chat/test-capabilities",
            post(crate::http::capabilities::test_capabilities),
        )
        .route(
            "/api/settings",
            get(crate::http::settings::get_settings).put(crate::http::settings::put_settings),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // the web frontend is served from a different origin
        .layer(tower_http::cors::CorsLayer::permissive())
}
