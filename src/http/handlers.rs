//! Axum HTTP handlers for the web server
//!
//! Provides the streamed-HTTP Model Context Protocol endpoint, the root descriptor and
//! the health and fallback routes.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::mcp::{
    dispatcher::SUPPORTED_PROTOCOL_VERSION,
    rpc::{json_rpc_error_with_data, PARSE_ERROR},
};
use crate::AppState;

pub const HTTP_ENDPOINT: &str = "/mcp";
pub const WEBSOCKET_ENDPOINT: &str = "/ws";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CapabilityFlags {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub protocol_version: &'static str,
    pub transports: Vec<&'static str>,
    pub capabilities: CapabilityFlags,
    pub endpoints: Endpoints,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>, headers: HeaderMap) -> Json<DiscoveryResponse> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let secure = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    let (http_scheme, ws_scheme) = if secure { ("https", "wss") } else { ("http", "ws") };

    let mut transports = Vec::new();
    let mut endpoints = Endpoints {
        websocket: None,
        http: None,
    };
    if state.transport.websocket_enabled() {
        transports.push("websocket");
        endpoints.websocket = Some(format!("{ws_scheme}://{host}{WEBSOCKET_ENDPOINT}"));
    }
    if state.transport.http_enabled() {
        transports.push("streamable-http");
        endpoints.http = Some(format!("{http_scheme}://{host}{HTTP_ENDPOINT}"));
    }

    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Remote MCP server exposing tools, resources and prompts",
        protocol_version: SUPPORTED_PROTOCOL_VERSION,
        transports,
        capabilities: CapabilityFlags {
            tools: true,
            resources: true,
            prompts: true,
        },
        endpoints,
    })
}

/// One POST, one envelope: the response goes out as a single SSE frame.
pub async fn mcp_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "rejecting undecodable MCP request body");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json_rpc_error_with_data(
                    None,
                    PARSE_ERROR,
                    "Parse error",
                    Some(Value::String(err.to_string())),
                )),
            )
                .into_response();
        }
    };

    match state.unit().dispatch(payload).await {
        Ok(Some(response)) => single_event(&response),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(err) => err.into_response(),
    }
}

fn single_event(response: &Value) -> Response {
    let event = Event::default().data(response.to_string());
    Sse::new(stream::iter([Ok::<_, Infallible>(event)])).into_response()
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
