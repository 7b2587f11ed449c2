//! Prompt templates exposed via Model Context Protocol

use rust_mcp_sdk::schema::{
    ContentBlock, GetPromptResult, Prompt, PromptArgument, PromptMessage, Role, TextContent,
};
use serde_json::{Map, Value};

use crate::errors::AppError;

fn argument(name: &str, description: &str, required: bool) -> PromptArgument {
    PromptArgument {
        description: Some(description.to_string()),
        name: name.to_string(),
        required: Some(required),
        title: None,
    }
}

fn descriptor(name: &str, description: &str, arguments: Vec<PromptArgument>) -> Prompt {
    Prompt {
        arguments,
        description: Some(description.to_string()),
        icons: Vec::new(),
        meta: None,
        name: name.to_string(),
        title: None,
    }
}

fn user_text(text: String) -> PromptMessage {
    PromptMessage {
        content: ContentBlock::from(TextContent::new(text, None, None)),
        role: Role::User,
    }
}

fn rendered(description: String, text: String) -> GetPromptResult {
    GetPromptResult {
        description: Some(description),
        messages: vec![user_text(text)],
        meta: None,
    }
}

/// String arguments of a `prompts/get` call, already checked against the descriptor.
#[derive(Debug, Default)]
pub struct PromptArguments(Map<String, Value>);

impl PromptArguments {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

pub trait PromptHandler: Send + Sync {
    fn describe(&self) -> Prompt;

    fn render(&self, arguments: &PromptArguments) -> GetPromptResult;
}

/// Checks required arguments are present and every supplied value is a string.
pub fn validate_arguments(
    descriptor: &Prompt,
    arguments: Map<String, Value>,
) -> Result<PromptArguments, AppError> {
    for (name, value) in &arguments {
        if !value.is_string() {
            return Err(AppError::bad_request(
                "invalid_prompt_argument",
                format!(
                    "Invalid arguments for prompt {}: argument {name} must be a string",
                    descriptor.name
                ),
            ));
        }
    }

    for argument in descriptor
        .arguments
        .iter()
        .filter(|a| a.required.unwrap_or(false)) {
        if !arguments.contains_key(&argument.name) {
            return Err(AppError::bad_request(
                "missing_prompt_argument",
                format!(
                    "Invalid arguments for prompt {}: missing required argument {}",
                    descriptor.name, argument.name
                ),
            ));
        }
    }

    Ok(PromptArguments(arguments))
}

pub struct ExplainCodePrompt;

impl PromptHandler for ExplainCodePrompt {
    fn describe(&self) -> Prompt {
        descriptor(
            "explain_code",
            "Explain how a piece of code works",
            vec![
                argument("code", "The code to explain", true),
                argument("language", "Programming language of the code", false),
            ],
        )
    }

    fn render(&self, arguments: &PromptArguments) -> GetPromptResult {
        let code = arguments.get("code").unwrap_or_default();
        let language = arguments.get("language").unwrap_or("code");

        rendered(
            format!("Explanation of {language} code"),
            format!("Please explain the following {language} code:\n\n```{language}\n{code}\n```"),
        )
    }
}

pub struct DebugHelpPrompt;

impl PromptHandler for DebugHelpPrompt {
    fn describe(&self) -> Prompt {
        descriptor(
            "debug_help",
            "Get help debugging an error",
            vec![
                argument("error", "The error message or symptom", true),
                argument("context", "Additional context about the problem", false),
            ],
        )
    }

    fn render(&self, arguments: &PromptArguments) -> GetPromptResult {
        let error = arguments.get("error").unwrap_or_default();
        let context = arguments
            .get("context")
            .map(|context| format!("Context: {context}\n\n"))
            .unwrap_or_default();

        rendered(
            "Debugging assistance".to_string(),
            format!(
                "I'm encountering the following error:\n\n{error}\n\n{context}Please help me understand what's causing it and how to fix it."
            ),
        )
    }
}
