//! Interactive tools exposed via Model Context Protocol
//!
//! Each tool is a typed argument struct. Its JSON schema comes from the SDK macros and
//! its arguments are validated by deserializing the call's `arguments` object into it.

use std::marker::PhantomData;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use rust_mcp_sdk::{macros, schema::Tool};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;

/// Object-safe view of a tool, stored in the registry.
pub trait ToolHandler: Send + Sync {
    fn describe(&self) -> Tool;

    /// Checks `arguments` against the tool's declared shape without running it.
    fn validate(&self, arguments: &Map<String, Value>) -> Result<(), AppError>;

    fn invoke(&self, arguments: Map<String, Value>) -> Result<String, AppError>;
}

/// A tool whose arguments deserialize into `Self` and whose output is plain text.
pub trait TextTool: DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn descriptor() -> Tool;

    /// Semantic checks that the schema alone cannot express.
    fn check(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn run(self) -> Result<String, AppError>;
}

pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TextTool> Typed<T> {
    fn parse(arguments: Map<String, Value>) -> Result<T, AppError> {
        let parsed: T = serde_json::from_value(Value::Object(arguments)).map_err(|err| {
            AppError::bad_request(
                "invalid_arguments",
                format!("Invalid arguments for tool {}: {err}", T::NAME),
            )
        })?;
        parsed.check()?;
        Ok(parsed)
    }
}

impl<T: TextTool> ToolHandler for Typed<T> {
    fn describe(&self) -> Tool {
        T::descriptor()
    }

    fn validate(&self, arguments: &Map<String, Value>) -> Result<(), AppError> {
        Self::parse(arguments.clone()).map(|_| ())
    }

    fn invoke(&self, arguments: Map<String, Value>) -> Result<String, AppError> {
        Self::parse(arguments)?.run()
    }
}

#[macros::mcp_tool(name = "echo", description = "Echo back the provided text")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    /// Text to echo back
    pub text: String,
}

impl TextTool for EchoTool {
    const NAME: &'static str = "echo";

    fn descriptor() -> Tool {
        Self::tool()
    }

    fn run(self) -> Result<String, AppError> {
        Ok(format!("Echo: {}", self.text))
    }
}

#[macros::mcp_tool(name = "get_time", description = "Get the current UTC time")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetTimeTool {}

impl TextTool for GetTimeTool {
    const NAME: &'static str = "get_time";

    fn descriptor() -> Tool {
        Self::tool()
    }

    fn run(self) -> Result<String, AppError> {
        Ok(format!(
            "Current time: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }
}

#[macros::mcp_tool(
    name = "random_number",
    description = "Generate a random integer between min and max (inclusive)"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct RandomNumberTool {
    /// Lower bound (inclusive)
    pub min: f64,
    /// Upper bound (inclusive)
    pub max: f64,
}

/// Largest magnitude at which an `f64` still names every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

impl RandomNumberTool {
    /// Bounds as integers, or `None` if either is fractional, non-finite or beyond
    /// [`MAX_EXACT_INTEGER`].
    fn integer_bounds(&self) -> Option<(i64, i64)> {
        let exact = |bound: f64| {
            bound.is_finite() && bound.fract() == 0.0 && bound.abs() <= MAX_EXACT_INTEGER
        };
        (exact(self.min) && exact(self.max)).then(|| (self.min as i64, self.max as i64))
    }

    fn invalid_range(detail: String) -> AppError {
        AppError::bad_request(
            "invalid_range",
            format!("Invalid arguments for tool random_number: {detail}"),
        )
    }
}

impl TextTool for RandomNumberTool {
    const NAME: &'static str = "random_number";

    fn descriptor() -> Tool {
        Self::tool()
    }

    fn check(&self) -> Result<(), AppError> {
        if self.integer_bounds().is_none() {
            return Err(Self::invalid_range(format!(
                "min ({}) and max ({}) must be integers within ±{MAX_EXACT_INTEGER}",
                self.min, self.max
            )));
        }
        if self.max < self.min {
            return Err(Self::invalid_range(format!(
                "min ({}) must not exceed max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }

    fn run(self) -> Result<String, AppError> {
        let (min, max) = self
            .integer_bounds()
            .ok_or_else(|| AppError::internal("random_number ran with unchecked bounds"))?;
        let value = rand::thread_rng().gen_range(min..=max);
        Ok(format!("Random number between {min} and {max}: {value}"))
    }
}
