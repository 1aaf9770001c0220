// Module: http
// axum router hosting the signaling and operator WebSockets

pub mod error;
pub mod health;
pub mod ice;
pub mod operator;
pub mod websocket;

use axum::{routing::get, Router};
use huddle_core::Config;
use huddle_sfu::{RoomFactory, SessionFactory};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<RoomFactory>,
    pub sessions: Arc<dyn SessionFactory>,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route("/api/ice-servers", get(ice::get_ice_servers))
        // WebSocket endpoints
        .route("/ws", get(websocket::websocket_handler))
        .route("/operator", get(operator::operator_handler));

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use huddle_sfu::test_helpers::FakeSessionFactory;
    use huddle_sfu::SfuConfig;
    use tower::ServiceExt;

    fn state(config: Config) -> AppState {
        AppState {
            factory: Arc::new(RoomFactory::new(SfuConfig::default())),
            sessions: FakeSessionFactory::new(),
            config: Arc::new(config),
        }
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_body(create_router(state(Config::default())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_ice_servers() {
        let mut config = Config::default();
        config.webrtc.turn_url = Some("turn:turn.example.com:3478".to_string());
        config.webrtc.turn_username = "user".to_string();
        config.webrtc.turn_credential = "secret".to_string();

        let (status, body) = get_body(create_router(state(config)), "/api/ice-servers").await;
        assert_eq!(status, StatusCode::OK);

        let response: ice::GetIceServersResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(
            response.servers,
            vec![
                ice::IceServerConfig {
                    urls: vec!["stun:stun.l.google.com:19302".to_string()],
                    username: None,
                    credential: None,
                },
                ice::IceServerConfig {
                    urls: vec!["turn:turn.example.com:3478".to_string()],
                    username: Some("user".to_string()),
                    credential: Some("secret".to_string()),
                },
            ]
        );
        assert!(!body.contains("\"username\":null"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get_body(create_router(state(Config::default())), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
