use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use super::app_state::AppState;
use super::{rest_api, ws_handler};

/// Maximum accepted request body size.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/api/servers",
            get(rest_api::list_servers).post(rest_api::create_server),
        )
        .route("/api/servers/{id}", delete(rest_api::delete_server))
        .route(
            "/api/servers/{id}/members",
            get(rest_api::list_server_members),
        )
        .route(
            "/api/servers/{id}/members/{user_id}",
            put(rest_api::add_server_member).delete(rest_api::remove_server_member),
        )
        .route(
            "/api/servers/{id}/channels",
            get(rest_api::list_server_channels).post(rest_api::create_channel),
        )
        .route("/api/channels/{id}", delete(rest_api::delete_channel))
        .route(
            "/api/channels/{id}/messages",
            get(rest_api::get_channel_history).post(rest_api::post_message),
        )
        .route(
            "/api/channels/{id}/messages/{message_id}",
            patch(rest_api::edit_message).delete(rest_api::delete_message),
        );

    Router::new()
        .route("/health", get(rest_api::health))
        .route("/ws", get(ws_handler::ws_upgrade))
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel_service::{ChannelService, ServiceLimits};
    use crate::engine::memory_storage::MemoryStorage;
    use crate::engine::presence::PresenceTracker;
    use crate::engine::storage::RetryPolicy;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let service = Arc::new(ChannelService::with_storage(
            Arc::new(MemoryStorage::new()),
            RetryPolicy::default(),
            ServiceLimits::default(),
        ));
        let state = Arc::new(AppState {
            service,
            presence: Arc::new(PresenceTracker::new()),
            outbound_queue: 16,
            shutdown: CancellationToken::new(),
        });
        (build_router(state.clone()), state)
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .header("content-length", json.len())
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_online_users() {
        let (app, state) = app();
        state.presence.connect("alice");
        state.presence.connect("alice");
        state.presence.connect("bob");

        let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["online_users"], 2);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (app, _) = app();
        let response = app
            .oneshot(request("GET", "/api/servers", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_server_and_post_message() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/servers",
                Some("alice"),
                Some(r#"{"name":"Test","description":"Rust chat"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let server = json_body(response).await;
        assert_eq!(server["description"], "Rust chat");
        let server_id = server["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/servers/{server_id}/channels"),
                Some("alice"),
                Some(r#"{"name":"general"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let channel = json_body(response).await;
        assert_eq!(channel["kind"], "text");
        let channel_id = channel["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/channels/{channel_id}/messages"),
                Some("alice"),
                Some(r#"{"content":"hi"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["id"], 1);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/channels/{channel_id}/messages"),
                Some("bob"),
                Some(r#"{"content":"hi"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["code"], "permission_denied");

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/channels/{channel_id}/messages?after=0&limit=10"),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let history = json_body(response).await;
        assert_eq!(history["messages"].as_array().unwrap().len(), 1);
        assert_eq!(history["messages"][0]["content"], "hi");
        assert_eq!(history["has_more"], false);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let (app, _) = app();
        let response = app
            .oneshot(request(
                "POST",
                "/api/channels/missing/messages",
                Some("alice"),
                Some(r#"{"content":"hi"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_members_report_presence() {
        let (app, state) = app();
        let server = state.service.create_server("alice", "Test", None).await.unwrap();
        state.service.join_server(&server.id, "bob").await.unwrap();
        state.presence.connect("bob");

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/servers/{}/members", server.id),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let members = json_body(response).await;
        assert_eq!(members[0]["user_id"], "alice");
        assert_eq!(members[0]["online"], false);
        assert_eq!(members[1]["user_id"], "bob");
        assert_eq!(members[1]["online"], true);
    }

    #[tokio::test]
    async fn test_join_self_and_add_other() {
        let (app, state) = app();
        let server = state.service.create_server("alice", "Test", None).await.unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/servers/{}/members/bob", server.id),
                Some("bob"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/servers/{}/members/carol", server.id),
                Some("bob"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(
                "DELETE",
                &format!("/api/servers/{}/members/alice", server.id),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (app, _) = app();
        let big = format!(r#"{{"name":"{}"}}"#, "a".repeat(MAX_BODY_BYTES));
        let response = app
            .oneshot(request("POST", "/api/servers", Some("alice"), Some(&big)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
