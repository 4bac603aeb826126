use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::errors::ProviderError;
use crate::models::message::ToolRequest;
use crate::models::tool::ToolCall;
use crate::providers::base::{
    CompletionRequest, CompletionStream, FinishReason, Provider, StreamEvent, Usage,
};

/// One scripted backend step
pub enum MockStep {
    /// Stream these events and end normally
    Events(Vec<StreamEvent>),
    /// Refuse the request before any streaming starts
    Refuse(String),
    /// Stream these events, then fail mid-stream
    Break(Vec<StreamEvent>, String),
    /// Stream these events, then never finish
    Hang(Vec<StreamEvent>),
}

impl MockStep {
    pub fn text(text: &str) -> Self {
        MockStep::Events(vec![
            StreamEvent::TextDelta(text.to_string()),
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage::default(),
            },
        ])
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        MockStep::Events(vec![
            StreamEvent::ToolCall(ToolRequest {
                id: id.to_string(),
                tool_call: ToolCall::new(name, arguments),
            }),
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage: Usage::default(),
            },
        ])
    }
}

/// A mock provider that plays back pre-configured steps and records every request
pub struct MockProvider {
    steps: Arc<Mutex<Vec<MockStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the requests received so far
    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());

        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.is_empty() {
                MockStep::text("")
            } else {
                steps.remove(0)
            }
        };

        match step {
            MockStep::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            MockStep::Refuse(message) => Err(ProviderError::Backend(message)),
            MockStep::Break(events, message) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::once(async move { Err(ProviderError::Stream(message)) }))
                .boxed()),
            MockStep::Hang(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}
