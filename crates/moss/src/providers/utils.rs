use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use super::base::Usage;
use crate::errors::ProviderError;
use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::{Tool, ToolCall};

/// Convert internal Message format to the OpenAI chat message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(content) => text.push_str(&content.text),
                MessageContent::ToolRequest(request) => {
                    tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&request.tool_call.name),
                            "arguments": request.tool_call.arguments.to_string(),
                        }
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    // The model sees error results too so it can react to them
                    output.push(json!({
                        "role": "tool",
                        "tool_call_id": response.id,
                        "content": response.result.to_string(),
                    }));
                }
            }
        }

        if !text.is_empty() {
            converted["content"] = json!(text);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }
        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to the OpenAI tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

pub fn get_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|usage| usage.is_object())?;
    let tokens = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);

    let input_tokens = tokens("prompt_tokens");
    let output_tokens = tokens("completion_tokens");
    let total_tokens = tokens("total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Some(Usage::new(input_tokens, output_tokens, total_tokens))
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Merges incremental `tool_calls` deltas by their index.
///
/// Backends that omit `index` are grouped by `id`: a delta carrying a new id starts
/// the next call, one without an id continues the current call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialToolCall>,
    current: Option<u64>,
}

impl ToolCallAccumulator {
    pub fn push_delta(&mut self, delta: &Value) {
        let id = delta
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        let index = match delta.get("index").and_then(Value::as_u64) {
            Some(index) => index,
            None => self.unindexed_slot(id),
        };
        self.current = Some(index);
        let call = self.calls.entry(index).or_default();

        // Ids arrive whole, and some backends repeat them on every chunk
        if let Some(id) = id {
            if call.id.is_empty() {
                call.id = id.to_string();
            }
        }
        if let Some(function) = delta.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                if call.name != name {
                    call.name.push_str(name);
                }
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                call.arguments.push_str(arguments);
            }
        }
    }

    fn unindexed_slot(&self, id: Option<&str>) -> u64 {
        let next = self.calls.keys().next_back().map_or(0, |last| last + 1);
        let Some(current) = self.current else {
            return next;
        };
        match (id, self.calls.get(&current)) {
            (Some(id), Some(call)) if !call.id.is_empty() && call.id != id => next,
            _ => current,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Complete tool requests in index order.
    ///
    /// Arguments that are not valid JSON are passed through as a string so schema
    /// validation reports them back to the model instead of failing the step.
    pub fn finish(self) -> Vec<ToolRequest> {
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let arguments = if call.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or(Value::String(call.arguments))
                };
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                ToolRequest {
                    id,
                    tool_call: ToolCall::new(call.name, arguments),
                }
            })
            .collect()
    }
}

fn invalid_characters() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("pattern is valid"))
}

/// Replace every character the backend does not accept in function names.
pub fn sanitize_function_name(name: &str) -> String {
    invalid_characters().replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty() && !invalid_characters().is_match(name)
}
