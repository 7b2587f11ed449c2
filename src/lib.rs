use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;

use config::{Config, TransportMode};
use domain::CapabilityRegistry;
use http::handlers::{HTTP_ENDPOINT, WEBSOCKET_ENDPOINT};
use session::{UnitDirectory, UnitHandle};

#[derive(Clone)]
pub struct AppState {
    pub api_token: Option<Arc<str>>,
    pub server_name: Arc<str>,
    pub transport: TransportMode,
    pub session_buffer: usize,
    pub units: UnitDirectory,
}

impl AppState {
    pub fn new(config: &Config, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            api_token: config.api_token.as_deref().map(Arc::<str>::from),
            server_name: Arc::<str>::from(config.server_name.as_str()),
            transport: config.transport,
            session_buffer: config.session_buffer,
            units: UnitDirectory::new(registry),
        }
    }

    /// The processing unit backing this server's logical name.
    pub fn unit(&self) -> UnitHandle {
        self.units.resolve(&self.server_name)
    }
}

pub fn build_app(state: AppState) -> Router {
    let mut transports = Router::new();
    if state.transport.http_enabled() {
        transports = transports.route(HTTP_ENDPOINT, post(http::handlers::mcp_endpoint));
    }
    if state.transport.websocket_enabled() {
        transports = transports.route(
            WEBSOCKET_ENDPOINT,
            get(http::websocket::websocket_endpoint),
        );
    }
    let protected = transports.route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_bearer_token,
    ));

    Router::new()
        .route("/", get(http::handlers::discovery))
        .route("/health", get(http::handlers::health))
        .merge(protected)
        .fallback(http::handlers::not_found)
        .layer(middleware::from_fn(http::cors::cors_middleware))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use futures_util::{SinkExt, StreamExt};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
    use tower::ServiceExt;

    use super::*;

    fn state_with(vars: &[(&str, &str)]) -> AppState {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let config = Config::from_lookup(|key| vars.get(key).cloned()).expect("valid config");
        AppState::new(&config, Arc::new(CapabilityRegistry::builtin()))
    }

    fn app() -> Router {
        build_app(state_with(&[]))
    }

    fn mcp_post(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    fn single_event_json(body: &str) -> Value {
        assert_eq!(body.matches("data:").count(), 1, "exactly one event: {body}");
        let data = body
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("single data frame");
        serde_json::from_str(data).expect("json event payload")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn root_describes_server_and_endpoints() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .header(header::HOST, "mcp.example.com")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        let body: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["protocolVersion"], "2024-11-05");
        assert!(body.get("protocol_version").is_none());
        assert_eq!(body["transports"], json!(["websocket", "streamable-http"]));
        assert_eq!(body["capabilities"]["prompts"], true);
        assert_eq!(body["endpoints"]["websocket"], "ws://mcp.example.com/ws");
        assert_eq!(body["endpoints"]["http"], "http://mcp.example.com/mcp");
    }

    #[tokio::test]
    async fn root_uses_secure_schemes_behind_tls_proxy() {
        let response = build_app(state_with(&[("MCP_TRANSPORT", "websocket")]))
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .header(header::HOST, "mcp.example.com")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        let body: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(body["transports"], json!(["websocket"]));
        assert_eq!(body["endpoints"]["websocket"], "wss://mcp.example.com/ws");
        assert!(body["endpoints"].get("http").is_none());
    }

    #[tokio::test]
    async fn unknown_path_is_plain_text_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/services")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Not found");
    }

    #[tokio::test]
    async fn options_is_answered_on_any_path() {
        for path in ["/", "/mcp", "/ws", "/does-not-exist"] {
            let response = app()
                .oneshot(
                    Request::builder()
                        .uri(path)
                        .method("OPTIONS")
                        .body(Body::empty())
                        .expect("request build"),
                )
                .await
                .expect("request execution");

            assert_eq!(response.status(), StatusCode::OK, "path {path}");
            let headers = response.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            assert_eq!(
                headers[header::ACCESS_CONTROL_ALLOW_METHODS],
                "GET, POST, OPTIONS"
            );
            assert_eq!(
                headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
                "Content-Type, Authorization"
            );
        }
    }

    #[tokio::test]
    async fn mcp_post_streams_one_event() {
        let response = app()
            .oneshot(mcp_post(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"text":"Hello, MCP!"}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );

        let event = single_event_json(&body_string(response).await);
        assert_eq!(event["jsonrpc"], "2.0");
        assert_eq!(event["id"], 1);
        assert_eq!(event["result"]["content"][0]["text"], "Echo: Hello, MCP!");
    }

    #[tokio::test]
    async fn mcp_unknown_tool_is_streamed_as_error_envelope() {
        let response = app()
            .oneshot(mcp_post(
                r#"{"jsonrpc":"2.0","id":503,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let event = single_event_json(&body_string(response).await);
        assert_eq!(event["id"], 503);
        assert_eq!(event["error"]["code"], -32601);
        assert_eq!(event["error"]["message"], "Unknown tool: nope");
        assert_eq!(event["error"]["data"]["code"], "tool_not_found");
    }

    #[tokio::test]
    async fn mcp_notification_yields_no_event() {
        let response = app()
            .oneshot(mcp_post(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn mcp_invalid_json_is_server_error() {
        let response = app()
            .oneshot(mcp_post("{"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(body["error"]["code"], -32700);
        assert!(body["id"].is_null());
    }

    #[tokio::test]
    async fn mcp_requires_token_when_configured() {
        let app = build_app(state_with(&[("MCP_API_TOKEN", "token-1234567890ab")]));

        let response = app
            .clone()
            .oneshot(mcp_post(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = mcp_post(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer token-1234567890ab".parse().expect("header value"),
        );
        let response = app.oneshot(request).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        let event = single_event_json(&body_string(response).await);
        assert_eq!(event["result"], json!({}));
    }

    #[tokio::test]
    async fn root_stays_public_when_token_configured() {
        let response = build_app(state_with(&[("MCP_API_TOKEN", "token-1234567890ab")]))
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn websocket_path_without_upgrade_requires_upgrade() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(response.headers()[header::UPGRADE], "websocket");
        let body: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(body["upgrade"], "websocket");
    }

    #[tokio::test]
    async fn disabled_transport_is_not_routed() {
        let response = build_app(state_with(&[("MCP_TRANSPORT", "http")]))
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn next_json<S>(socket: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let frame = socket
            .next()
            .await
            .expect("frame")
            .expect("websocket frame");
        serde_json::from_str(frame.to_text().expect("text frame")).expect("json frame")
    }

    #[tokio::test]
    async fn websocket_session_round_trip() {
        let state = state_with(&[]);
        let unit = state.unit();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, build_app(state)).await;
        });

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("websocket connect");

        let initialized = next_json(&mut socket).await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());

        socket
            .send(WsMessage::Text(
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"random_number","arguments":{"min":5,"max":5}}}"#
                    .into(),
            ))
            .await
            .expect("send request");
        let response = next_json(&mut socket).await;
        assert_eq!(response["id"], 7);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Random number between 5 and 5: 5"
        );

        socket
            .send(WsMessage::Text("not json".into()))
            .await
            .expect("send garbage");
        let response = next_json(&mut socket).await;
        assert!(response["id"].is_null());
        assert_eq!(response["error"]["code"], -32700);

        assert_eq!(unit.open_connections().await.expect("count"), 1);

        socket.close(None).await.expect("close");
        while let Some(Ok(_)) = socket.next().await {}

        let mut open = unit.open_connections().await.expect("count");
        for _ in 0..50 {
            if open == 0 {
                break;
            }
            tokio::task::yield_now().await;
            open = unit.open_connections().await.expect("count");
        }
        assert_eq!(open, 0);
    }
}
