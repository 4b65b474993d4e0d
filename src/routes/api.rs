use crate::{handlers::{diagnostics, health_check, ready_check, session_info, status}, ws::coordinator::Coordinator};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(coordinator: Arc<Coordinator>) -> Router {
    Router::<Arc<Coordinator>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/status", get(status))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/sessions/:doc_id", get(session_info))
        .with_state(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use axum::{body::{to_bytes, Body}, http::{Request, StatusCode}};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_reports_connections_and_sessions() {
        let coordinator = Coordinator::new(SyncSettings::default());
        let _a = coordinator.on_connect("alice", Some("doc1")).unwrap();
        let _b = coordinator.on_connect("bob", None).unwrap();

        let (code, body) = get_json(create_api_routes(coordinator), "/v1/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["connectedUsers"], 2);
        assert_eq!(body["activeSessions"], 1);
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn session_lookup_returns_404_for_unknown_document() {
        let coordinator = Coordinator::new(SyncSettings::default());
        let _a = coordinator.on_connect("alice", Some("doc1")).unwrap();
        let app = create_api_routes(coordinator);

        let (code, body) = get_json(app.clone(), "/v1/sessions/doc1").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["members"], serde_json::json!(["alice"]));

        let (code, body) = get_json(app, "/v1/sessions/missing").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn ready_flips_after_shutdown() {
        let coordinator = Coordinator::new(SyncSettings::default());
        let app = create_api_routes(coordinator.clone());

        let (code, _) = get_json(app.clone(), "/ready").await;
        assert_eq!(code, StatusCode::OK);

        coordinator.shutdown().await;
        let (code, body) = get_json(app, "/ready").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["acceptingConnections"], false);
    }
}
