//! The central Model Context Protocol engine
//!
//! Decodes JSON-RPC envelopes, negotiates `initialize`, and routes the tool, resource
//! and prompt methods to the capability registry. Dispatch is synchronous.

use std::sync::Arc;

use rust_mcp_sdk::schema::{
    CallToolRequestParams, CallToolResult, ContentBlock, Implementation, InitializeResult,
    JsonrpcMessage, ListPromptsResult, ListResourcesResult, ListToolsResult, ProtocolVersion,
    ReadResourceRequestParams, ServerCapabilities, ServerCapabilitiesPrompts,
    ServerCapabilitiesResources, ServerCapabilitiesTools, TextContent,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::{prompts::validate_arguments, resources::read_resource, CapabilityRegistry};
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_result,
    request_id_to_value, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Handles one decoded envelope. Notifications yield `None`.
    pub fn dispatch(&self, mut payload: Value) -> Option<Value> {
        let Some(object) = payload.as_object_mut() else {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        };

        // `"id": null` marks a notification just like an absent id.
        if object.get("id").is_some_and(Value::is_null) {
            object.remove("id");
        }

        let request_id = payload.get("id").cloned();
        let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
        };

        match parsed {
            JsonrpcMessage::Request(request) => {
                let request_id = request_id_to_value(request.id);
                if request.method.trim().is_empty() {
                    return Some(json_rpc_error(
                        Some(request_id),
                        INVALID_REQUEST,
                        "Invalid Request",
                    ));
                }

                Some(self.handle_request(
                    Some(request_id),
                    &request.method,
                    request.params.map(Value::Object),
                ))
            }
            JsonrpcMessage::Notification(notification) => {
                info!(method = %notification.method, "mcp notification received");
                None
            }
            JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
                Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"))
            }
        }
    }

    pub fn handle_request(&self, id: Option<Value>, method: &str, params: Option<Value>) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let outcome = match method {
            "initialize" => self.initialize(params.as_ref()),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(params),
            "resources/list" => self.list_resources(),
            "resources/read" => self.read_resource(params),
            "prompts/list" => self.list_prompts(),
            "prompts/get" => self.get_prompt(params),
            _ => Err(RequestFailure::MethodNotFound),
        };

        let response = match outcome {
            Ok(result) => json_rpc_result(id, result),
            Err(RequestFailure::App(err)) => app_error_to_json_rpc(id, err),
            Err(RequestFailure::InvalidParams) => {
                json_rpc_error(id, INVALID_PARAMS, "Invalid params")
            }
            Err(RequestFailure::MethodNotFound) => {
                json_rpc_error(id, METHOD_NOT_FOUND, "Method not found")
            }
        };

        info!(
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    fn initialize(&self, params: Option<&Value>) -> Result<Value, RequestFailure> {
        let protocol_version = negotiate_protocol_version(params)?;

        let initialize_result = InitializeResult {
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
                resources: Some(ServerCapabilitiesResources {
                    subscribe: Some(false),
                    list_changed: Some(false),
                }),
                prompts: Some(ServerCapabilitiesPrompts {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            protocol_version: protocol_version.into(),
            instructions: None,
            meta: None,
        };

        to_result(initialize_result)
    }

    fn list_tools(&self) -> Result<Value, RequestFailure> {
        to_result(ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: self
                .registry
                .tools
                .iter()
                .map(|tool| tool.describe())
                .collect(),
        })
    }

    fn call_tool(&self, params: Option<Value>) -> Result<Value, RequestFailure> {
        let tool_call: CallToolRequestParams = parse_params(params)?;

        let tool = self.registry.tools.get(&tool_call.name).ok_or_else(|| {
            AppError::not_found("tool_not_found", format!("Unknown tool: {}", tool_call.name))
        })?;

        let arguments = tool_call.arguments.unwrap_or_default();
        tool.validate(&arguments)?;
        let text = tool.invoke(arguments)?;

        to_result(CallToolResult {
            content: vec![ContentBlock::from(TextContent::new(text, None, None))],
            is_error: None,
            meta: None,
            structured_content: None,
        })
    }

    fn list_resources(&self) -> Result<Value, RequestFailure> {
        to_result(ListResourcesResult {
            meta: None,
            next_cursor: None,
            resources: self
                .registry
                .resources
                .iter()
                .map(|resource| resource.describe())
                .collect(),
        })
    }

    fn read_resource(&self, params: Option<Value>) -> Result<Value, RequestFailure> {
        let resource_read: ReadResourceRequestParams = parse_params(params)?;

        let resource = self
            .registry
            .resources
            .get(&resource_read.uri)
            .ok_or_else(|| {
                AppError::not_found(
                    "resource_not_found",
                    format!("Unknown resource: {}", resource_read.uri),
                )
            })?;

        to_result(read_resource(resource.as_ref())?)
    }

    fn list_prompts(&self) -> Result<Value, RequestFailure> {
        to_result(ListPromptsResult {
            meta: None,
            next_cursor: None,
            prompts: self
                .registry
                .prompts
                .iter()
                .map(|prompt| prompt.describe())
                .collect(),
        })
    }

    fn get_prompt(&self, params: Option<Value>) -> Result<Value, RequestFailure> {
        let prompt_get: GetPromptParams = parse_params(params)?;

        let prompt = self.registry.prompts.get(&prompt_get.name).ok_or_else(|| {
            AppError::not_found(
                "prompt_not_found",
                format!("Unknown prompt: {}", prompt_get.name),
            )
        })?;

        let arguments =
            validate_arguments(&prompt.describe(), prompt_get.arguments.unwrap_or_default())?;
        to_result(prompt.render(&arguments))
    }
}

enum RequestFailure {
    App(AppError),
    InvalidParams,
    MethodNotFound,
}

impl From<AppError> for RequestFailure {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, RequestFailure> {
    let raw_params = params.ok_or(RequestFailure::InvalidParams)?;
    serde_json::from_value(raw_params).map_err(|_| RequestFailure::InvalidParams)
}

fn to_result<T: serde::Serialize>(result: T) -> Result<Value, RequestFailure> {
    serde_json::to_value(result)
        .map_err(|err| AppError::internal(format!("result serialization failed: {err}")).into())
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        info!(
            offered = %offered_version,
            supported = SUPPORTED_PROTOCOL_VERSION,
            "client offered a different protocol version"
        );
    }

    Ok(ProtocolVersion::V2024_11_05)
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
