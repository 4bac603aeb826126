use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::base::{CompletionRequest, CompletionStream, FinishReason, Provider, StreamEvent, Usage};
use super::configs::OpenRouterProviderConfig;
use super::utils::{get_usage, messages_to_openai_spec, tools_to_openai_spec, ToolCallAccumulator};
use crate::errors::ProviderError;
use crate::sse::SseParser;

pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterProviderConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.system
        })];
        messages.extend(messages_to_openai_spec(&request.messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(&request.tools)?);
        }
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("X-Title", "moss")
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status => Err(ProviderError::Request {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Turns decoded stream chunks into [`StreamEvent`]s.
#[derive(Default)]
struct ChunkDecoder {
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl ChunkDecoder {
    fn decode(&mut self, chunk: &Value) -> Result<Option<StreamEvent>, ProviderError> {
        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::Backend(message));
        }
        if let Some(usage) = get_usage(chunk) {
            self.usage = usage;
        }

        let Some(choice) = chunk.get("choices").and_then(|choices| choices.get(0)) else {
            return Ok(None);
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(FinishReason::from_openai(reason));
        }

        let delta = &choice["delta"];
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            calls.iter().for_each(|call| self.tool_calls.push_delta(call));
        }
        match delta.get("content").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => Ok(Some(StreamEvent::TextDelta(text.to_string()))),
            _ => Ok(None),
        }
    }

    fn finish(self) -> Vec<StreamEvent> {
        let had_tool_calls = !self.tool_calls.is_empty();
        let mut events: Vec<StreamEvent> = self
            .tool_calls
            .finish()
            .into_iter()
            .map(StreamEvent::ToolCall)
            .collect();
        let reason = self.finish_reason.unwrap_or(if had_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Other
        });
        events.push(StreamEvent::Finish {
            reason,
            usage: self.usage,
        });
        events
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, ProviderError> {
        let payload = self.build_payload(request)?;
        let response = self.post(&payload).await?;
        let mut body = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseParser::default();
            let mut decoder = ChunkDecoder::default();

            'body: loop {
                // A last frame without its blank line still counts once the body ends
                let (events, ended) = match body.next().await {
                    Some(Ok(bytes)) => (parser.feed(&bytes), false),
                    Some(Err(e)) => {
                        yield Err(ProviderError::Http(e));
                        return;
                    }
                    None => (parser.finish().into_iter().collect(), true),
                };
                for event in events {
                    if event.data.trim() == "[DONE]" {
                        break 'body;
                    }
                    let chunk: Value = match serde_json::from_str(&event.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            yield Err(ProviderError::Stream(format!("{e}: {}", event.data)));
                            return;
                        }
                    };
                    match decoder.decode(&chunk) {
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                if ended {
                    break;
                }
            }

            for event in decoder.finish() {
                yield Ok(event);
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::tool::{Tool, ToolCall};
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|chunk| format!("data: {chunk}\n\n"))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn setup_mock_server(status: u16, body: String) -> (MockServer, OpenRouterProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"stream": true, "model": "test/model"})))
            .respond_with(
                ResponseTemplate::new(status).set_body_raw(body, "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let config = OpenRouterProviderConfig {
            host: format!("{}/api/v1", mock_server.uri()),
            api_key: "test_api_key".to_string(),
            model: "test/model".to_string(),
        };
        let provider = OpenRouterProvider::new(config).unwrap();
        (mock_server, provider)
    }

    fn request(tools: Vec<Tool>) -> CompletionRequest {
        CompletionRequest {
            system: "You are a helpful assistant.".into(),
            messages: vec![Message::user().with_text("Hello?")],
            tools,
            temperature: 0.5,
            max_tokens: 32_000,
        }
    }

    #[tokio::test]
    async fn test_stream_text() {
        let body = sse_body(&[
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo!"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let events: Vec<StreamEvent> = provider
            .stream(&request(vec![]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo!".into()),
                StreamEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: Usage::new(Some(12), Some(2), Some(14)),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_unterminated_last_frame_is_kept() {
        let body = format!(
            "data: {}\n\ndata: {}",
            json!({"choices": [{"delta": {"content": "partial"}}]}),
            json!({"choices": [{"delta": {"content": " end"}, "finish_reason": "stop"}]}),
        );
        let (_server, provider) = setup_mock_server(200, body).await;

        let events: Vec<StreamEvent> = provider
            .stream(&request(vec![]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::TextDelta("partial".into()));
        assert_eq!(events[1], StreamEvent::TextDelta(" end".into()));
        assert!(matches!(
            events[2],
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stream_tool_calls() {
        let body = sse_body(&[
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_123", "type": "function", "function": {"name": "get_weather", "arguments": ""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"location\":"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"San Francisco, CA\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;
        let tool = Tool::new(
            "get_weather",
            "Gets the current weather for a location",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        );

        let events: Vec<StreamEvent> = provider
            .stream(&request(vec![tool]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        let StreamEvent::ToolCall(call) = &events[0] else {
            panic!("expected a tool call, got {:?}", events[0]);
        };
        assert_eq!(call.id, "call_123");
        assert_eq!(
            call.tool_call,
            ToolCall::new("get_weather", json!({"location": "San Francisco, CA"}))
        );
        assert!(matches!(
            events[1],
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refused_request() {
        let (_server, provider) =
            setup_mock_server(401, r#"{"error":{"message":"No auth"}}"#.to_string()).await;

        match provider.stream(&request(vec![])).await {
            Err(ProviderError::Request { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("No auth"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected the request to be refused"),
        }
    }

    #[tokio::test]
    async fn test_error_chunk_fails_the_stream() {
        let body = sse_body(&[
            json!({"choices": [{"delta": {"content": "partial"}}]}),
            json!({"error": {"message": "upstream overloaded"}}),
        ]);
        let (_server, provider) = setup_mock_server(200, body).await;

        let result: Result<Vec<StreamEvent>, _> = provider
            .stream(&request(vec![]))
            .await
            .unwrap()
            .try_collect()
            .await;
        match result {
            Err(ProviderError::Backend(message)) => assert_eq!(message, "upstream overloaded"),
            other => panic!("expected backend error, got {other:?}"),
        }
    }
}
