//! Model Context Protocol static resource providers
//!
//! Exposes fixed JSON documents under `cloudflare://` URIs. Payloads are static apart
//! from a timestamp generated on every read.

use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::schema::{ReadResourceContent, ReadResourceResult, Resource, TextResourceContents};
use serde_json::{json, Value};

use crate::errors::AppError;

pub const WORKER_INFO_RESOURCE_URI: &str = "cloudflare://worker-info";
pub const SAMPLE_DATA_RESOURCE_URI: &str = "cloudflare://sample-data";

const JSON_MIME_TYPE: &str = "application/json";

pub trait ResourceHandler: Send + Sync {
    fn describe(&self) -> Resource;

    /// Produces the JSON document served for this resource.
    fn read(&self) -> Result<Value, AppError>;
}

pub fn read_resource(handler: &dyn ResourceHandler) -> Result<ReadResourceResult, AppError> {
    let descriptor = handler.describe();
    let document = handler.read()?;

    Ok(ReadResourceResult {
        contents: vec![ReadResourceContent::from(TextResourceContents {
            meta: None,
            mime_type: descriptor.mime_type,
            text: document.to_string(),
            uri: descriptor.uri,
        })],
        meta: None,
    })
}

fn json_resource(uri: &str, name: &str, description: &str) -> Resource {
    Resource {
        annotations: None,
        description: Some(description.to_string()),
        icons: vec![],
        meta: None,
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        name: name.to_string(),
        size: None,
        title: None,
        uri: uri.to_string(),
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct WorkerInfoResource;

impl ResourceHandler for WorkerInfoResource {
    fn describe(&self) -> Resource {
        json_resource(
            WORKER_INFO_RESOURCE_URI,
            "Worker Information",
            "Runtime metadata about this MCP server",
        )
    }

    fn read(&self) -> Result<Value, AppError> {
        Ok(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "runtime": "tokio",
            "transports": ["websocket", "streamable-http"],
            "timestamp": now_utc(),
        }))
    }
}

pub struct SampleDataResource;

impl ResourceHandler for SampleDataResource {
    fn describe(&self) -> Resource {
        json_resource(
            SAMPLE_DATA_RESOURCE_URI,
            "Sample Data",
            "A small sample dataset for testing resource reads",
        )
    }

    fn read(&self) -> Result<Value, AppError> {
        let items = vec![
            json!({ "id": 1, "name": "Item 1", "value": 100 }),
            json!({ "id": 2, "name": "Item 2", "value": 200 }),
            json!({ "id": 3, "name": "Item 3", "value": 300 }),
        ];

        Ok(json!({
            "metadata": {
                "total": items.len(),
                "generated_at": now_utc(),
            },
            "items": items,
        }))
    }
}
