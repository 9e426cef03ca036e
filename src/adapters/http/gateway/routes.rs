//! HTTP routes for the operator endpoints.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::adapters::http::middleware::{auth_middleware, AuthState};

use super::handlers::{list_connections, publish_message, GatewayHandlers};

/// Creates the `/api` router; every route requires a bearer token.
pub fn gateway_routes(handlers: GatewayHandlers, validator: AuthState) -> Router {
    Router::new()
        .route("/api/publish", post(publish_message))
        .route("/api/connections", get(list_connections))
        .with_state(handlers)
        .layer(middleware::from_fn_with_state(validator, auth_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::MockSessionValidator;
    use crate::adapters::broker::{BrokerClient, BrokerSettings, InMemoryBroker};
    use crate::adapters::websocket::{ConnectionRegistry, RecordingSocket, SocketHandle};
    use crate::domain::foundation::{ConnectionId, UserId};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        registry: Arc<ConnectionRegistry>,
        app: Router,
    }

    async fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        let client = BrokerClient::connect(broker.clone(), BrokerSettings::new("memory://", "ws_events"))
            .await
            .unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let handlers = GatewayHandlers::new(Arc::new(client), registry.clone(), CancellationToken::new());
        let validator: AuthState = Arc::new(MockSessionValidator::new().with_test_user("ops-token", "ops"));

        Fixture {
            broker,
            registry,
            app: gateway_routes(handlers, validator),
        }
    }

    fn authed(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", "Bearer ops-token")
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn publish_requires_token() {
        let f = fixture().await;

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/publish")
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({"routing_key": "ws_order.x", "message": {}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn publish_rejects_bad_token() {
        let f = fixture().await;

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/publish")
                    .header("Authorization", "Bearer wrong")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "AUTH_ERROR");
    }

    #[tokio::test]
    async fn publish_sends_message_to_exchange() {
        let f = fixture().await;
        let body = json!({"routing_key": "ws_order.created", "message": {"id": 3}}).to_string();

        let response = f
            .app
            .oneshot(authed("POST", "/api/publish", Body::from(body)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let published = f.broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "ws_order.created");
    }

    #[tokio::test]
    async fn publish_requires_routing_key() {
        let f = fixture().await;
        let body = json!({"routing_key": "", "message": {}}).to_string();

        let response = f
            .app
            .oneshot(authed("POST", "/api/publish", Body::from(body)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_unavailable() {
        let f = fixture().await;
        f.broker.drop_connections();
        let body = json!({"routing_key": "ws_order.x", "message": {}}).to_string();

        let response = f
            .app
            .oneshot(authed("POST", "/api/publish", Body::from(body)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn connections_lists_registry_without_sockets() {
        let f = fixture().await;
        let alice = UserId::new("alice").unwrap();
        let conn = ConnectionId::new();
        f.registry
            .add(&alice, conn, SocketHandle::new(Arc::new(RecordingSocket::new())), true)
            .unwrap();
        f.registry.add_channel(&alice, conn, "order_update").unwrap();

        let response = f
            .app
            .oneshot(authed("GET", "/api/connections", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_users"], 1);
        assert_eq!(body["total_connections"], 1);
        assert_eq!(body["users"][0]["user_id"], "alice");
        assert_eq!(body["users"][0]["connections"][0]["channel"], "order_update");
        assert_eq!(body["users"][0]["connections"][0]["connection_id"], conn.to_string());
    }
}
