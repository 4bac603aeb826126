use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use super::tool::ToolCall;

const MESSAGE_ID_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub id: String,
    pub tool_name: String,
    /// The structured result, or an object with an `error` field when the call failed
    pub result: Value,
}

impl ToolResponse {
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// Content passed inside a message, which can be both simple content and tool content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    Text(TextContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: ToolCall) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S, N>(id: S, tool_name: N, result: Value) -> Self
    where
        S: Into<String>,
        N: Into<String>,
    {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_name: tool_name.into(),
            result,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }
}

/// A message to or from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            id: nanoid::nanoid!(MESSAGE_ID_LENGTH),
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a new message carrying tool results
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    pub fn with_tool_request<S: Into<String>>(self, id: S, tool_call: ToolCall) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    pub fn with_tool_response<S, N>(self, id: S, tool_name: N, result: Value) -> Self
    where
        S: Into<String>,
        N: Into<String>,
    {
        self.with_content(MessageContent::tool_response(id, tool_name, result))
    }

    /// All text content joined together
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.content.iter().filter_map(MessageContent::as_tool_request)
    }

    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResponse> {
        self.content.iter().filter_map(MessageContent::as_tool_response)
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_builders() {
        let message = Message::assistant()
            .with_text("Let me check. ")
            .with_text("One moment.")
            .with_tool_request("call_1", ToolCall::new("fs_read", json!({"file_path": "a.txt"})));

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.id.len(), MESSAGE_ID_LENGTH);
        assert_eq!(message.text(), "Let me check. One moment.");
        let requests: Vec<_> = message.tool_requests().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_call.name, "fs_read");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Message::user().id, Message::user().id);
    }

    #[test]
    fn test_content_serialization_shape() {
        let message = Message::tool().with_tool_response(
            "call_1",
            "fs_read",
            json!({"error": "Failed to read a.txt"}),
        );
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["role"], "tool");
        assert_eq!(value["content"][0]["type"], "toolResponse");
        assert_eq!(value["content"][0]["toolName"], "fs_read");
        assert!(message.tool_responses().all(ToolResponse::is_error));
    }
}
